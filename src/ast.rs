//! Abstract Syntax Tree for the keymap DSL.
//!
//! An [`Ast`] is an immutable snapshot of one successful parse. Statement
//! positions are 1-based source lines and columns (in characters) and are
//! kept for diagnostics and for re-anchoring comments when the text is
//! regenerated. Nodes built outside the parser carry zero positions.

use serde::Serialize;

/// Root of a parsed keymap document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ast {
    pub imports: Vec<Import>,
    pub global_mappings: Vec<Mapping>,
    /// Layers declared at top level (global scope).
    pub global_layers: Vec<Layer>,
    pub device_blocks: Vec<DeviceBlock>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Import {
    pub path: String,
    pub line: usize,
    pub column: usize,
}

/// One mapping statement: the physical source key and what it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source_key: String,
    #[serde(flatten)]
    pub action: Action,
    pub line: usize,
    pub column: usize,
    /// Line of the terminating `;`.
    pub end_line: usize,
}

/// Action kinds a source key can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    /// `map("A", "B")`
    Simple { target_key: String },
    /// `tap_hold("Space", "Space", "MD_00", 200)`
    TapHold {
        tap: String,
        hold: String,
        threshold_ms: u32,
    },
    /// `layer_switch("CapsLock", "nav")`
    LayerSwitch { target_layer: String },
    /// `with_mods("A", "B", shift, ctrl, alt, win)`, or
    /// `map("A", with_shift("B"))` when exactly one modifier is held.
    ModifiedOutput {
        target_key: String,
        shift: bool,
        ctrl: bool,
        alt: bool,
        win: bool,
    },
    /// `macro("F1", [press("LCtrl"), tap("C"), release("LCtrl")])`
    Macro { steps: Vec<MacroStep> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum MacroStep {
    Press(String),
    Release(String),
    Tap(String),
    Wait(u32),
}

/// `layer("name") { ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub name: String,
    pub mappings: Vec<Mapping>,
    pub start_line: usize,
    pub start_column: usize,
    /// Position of the closing `}`.
    pub end_line: usize,
    pub end_column: usize,
}

/// `device("pattern") { ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBlock {
    /// Device serial, id, or wildcard pattern. Never empty.
    pub pattern: String,
    pub mappings: Vec<Mapping>,
    pub layers: Vec<Layer>,
    pub start_line: usize,
    pub start_column: usize,
    /// Position of the closing `}`.
    pub end_line: usize,
    pub end_column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CommentKind {
    Line,
    Block,
}

/// A source comment, including its delimiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub text: String,
    pub kind: CommentKind,
    pub line: usize,
    pub column: usize,
    /// Comment follows code on the same line.
    pub trailing: bool,
}

impl Comment {
    /// Number of source lines the comment occupies.
    pub fn line_span(&self) -> usize {
        self.text.matches('\n').count() + 1
    }
}

impl Mapping {
    pub fn new(source_key: impl Into<String>, action: Action) -> Self {
        Mapping {
            source_key: source_key.into(),
            action,
            line: 0,
            column: 0,
            end_line: 0,
        }
    }

    pub fn simple(source_key: impl Into<String>, target_key: impl Into<String>) -> Self {
        Self::new(
            source_key,
            Action::Simple {
                target_key: target_key.into(),
            },
        )
    }

    /// Same statement, ignoring its position.
    pub fn same_statement(&self, other: &Mapping) -> bool {
        self.source_key == other.source_key && self.action == other.action
    }

    /// Copy with the source position cleared.
    pub fn unpositioned(&self) -> Mapping {
        Mapping::new(self.source_key.clone(), self.action.clone())
    }
}

impl Action {
    /// DSL function name of this action.
    pub fn keyword(&self) -> &'static str {
        match self {
            Action::Simple { .. } => "map",
            Action::TapHold { .. } => "tap_hold",
            Action::LayerSwitch { .. } => "layer_switch",
            Action::ModifiedOutput { .. } => "with_mods",
            Action::Macro { .. } => "macro",
        }
    }
}

impl Ast {
    /// True when the document declares no mappings anywhere.
    pub fn has_no_mappings(&self) -> bool {
        self.global_mappings.is_empty()
            && self.global_layers.iter().all(|l| l.mappings.is_empty())
            && self
                .device_blocks
                .iter()
                .all(|d| d.mappings.is_empty() && d.layers.iter().all(|l| l.mappings.is_empty()))
    }

    pub fn device_block(&self, pattern: &str) -> Option<&DeviceBlock> {
        self.device_blocks.iter().find(|d| d.pattern == pattern)
    }

    /// Copy with positions zeroed, comments removed and empty device blocks
    /// dropped: two documents with equal canonical forms express the same
    /// key mappings.
    pub fn canonical(&self) -> Ast {
        fn strip_mappings(mappings: &[Mapping]) -> Vec<Mapping> {
            mappings.iter().map(Mapping::unpositioned).collect()
        }
        fn strip_layers(layers: &[Layer]) -> Vec<Layer> {
            layers
                .iter()
                .map(|l| Layer {
                    name: l.name.clone(),
                    mappings: strip_mappings(&l.mappings),
                    start_line: 0,
                    start_column: 0,
                    end_line: 0,
                    end_column: 0,
                })
                .collect()
        }
        Ast {
            imports: self
                .imports
                .iter()
                .map(|i| Import {
                    path: i.path.clone(),
                    line: 0,
                    column: 0,
                })
                .collect(),
            global_mappings: strip_mappings(&self.global_mappings),
            global_layers: strip_layers(&self.global_layers),
            device_blocks: self
                .device_blocks
                .iter()
                .filter(|d| !d.mappings.is_empty() || !d.layers.is_empty())
                .map(|d| DeviceBlock {
                    pattern: d.pattern.clone(),
                    mappings: strip_mappings(&d.mappings),
                    layers: strip_layers(&d.layers),
                    start_line: 0,
                    start_column: 0,
                    end_line: 0,
                    end_column: 0,
                })
                .collect(),
            comments: Vec::new(),
        }
    }

    /// Equal modulo positions and comment placement.
    pub fn equivalent(&self, other: &Ast) -> bool {
        self.canonical() == other.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ignores_lines_and_comments() {
        let mut a = Ast::default();
        a.global_mappings.push(Mapping {
            line: 3,
            ..Mapping::simple("A", "B")
        });
        a.comments.push(Comment {
            text: "// x".to_string(),
            kind: CommentKind::Line,
            line: 1,
            column: 1,
            trailing: false,
        });
        let mut b = Ast::default();
        b.global_mappings.push(Mapping {
            line: 1,
            ..Mapping::simple("A", "B")
        });
        assert!(a.equivalent(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn empty_device_blocks_are_not_significant() {
        let mut a = Ast::default();
        a.device_blocks.push(DeviceBlock {
            pattern: "SN-1".to_string(),
            mappings: Vec::new(),
            layers: Vec::new(),
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 17,
        });
        assert!(a.equivalent(&Ast::default()));
        assert!(a.has_no_mappings());
    }

    #[test]
    fn mapping_serializes_with_type_tag() {
        let m = Mapping::simple("A", "B");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "simple");
        assert_eq!(json["sourceKey"], "A");
        assert_eq!(json["targetKey"], "B");
    }

    #[test]
    fn modified_output_serializes_flags() {
        let m = Mapping::new(
            "A",
            Action::ModifiedOutput {
                target_key: "1".to_string(),
                shift: true,
                ctrl: false,
                alt: false,
                win: false,
            },
        );
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "modifiedOutput");
        assert_eq!(json["targetKey"], "1");
        assert_eq!(json["shift"], true);
        assert_eq!(m.action.keyword(), "with_mods");
    }

    #[test]
    fn block_comment_line_span() {
        let c = Comment {
            text: "/* a\n b\n c */".to_string(),
            kind: CommentKind::Block,
            line: 4,
            column: 1,
            trailing: false,
        };
        assert_eq!(c.line_span(), 3);
    }
}
