//! Canonical DSL text from an AST, carrying comments across.
//!
//! Comments are anchored to statements by identity rather than by line: a
//! leading comment belongs to the next statement, block opener or block
//! closer after it, a trailing comment to the last one that starts before it
//! (by line and column). A comment inside a statement that spans several
//! lines belongs to that statement. Rendering re-emits each comment next to its anchor wherever that
//! anchor ends up. Comments before the first statement stay at the top,
//! comments after the last one stay at the bottom, and comments whose anchor
//! is gone are dropped.
//!
//! Layout: four-space indentation, one statement per line, a blank line
//! between the import section, the global section and each device block.

use crate::ast::{Action, Ast, Comment, CommentKind, DeviceBlock, Import, Layer, MacroStep, Mapping};
use crate::error::ParseError;
use crate::lint::INDENT;
use crate::parser::{parse, quote};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Anchor {
    Import(String),
    Mapping {
        device: Option<String>,
        layer: Option<String>,
        key: String,
    },
    DeviceOpen(String),
    DeviceClose(String),
    LayerOpen {
        device: Option<String>,
        name: String,
    },
    LayerClose {
        device: Option<String>,
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Before,
    After,
}

/// Comments of one document, keyed by the statement they belong to.
#[derive(Debug, Clone, Default)]
pub struct CommentAnchors {
    header: Vec<String>,
    footer: Vec<String>,
    attached: HashMap<(Anchor, Side), Vec<String>>,
}

impl CommentAnchors {
    pub fn collect(ast: &Ast) -> Self {
        let events = events(ast);
        let mut anchors = CommentAnchors::default();
        for c in &ast.comments {
            let text = normalize(&c.text);
            let at = (c.line, c.column);
            let before = events.iter().rev().find(|e| e.start < at);
            if c.trailing || before.is_some_and(|e| e.encloses(c.line)) {
                match before {
                    Some(e) => anchors.attach(e.anchor.clone(), Side::After, text),
                    None => anchors.header.push(text),
                }
                continue;
            }
            match events.iter().position(|e| e.start >= at) {
                Some(0) => anchors.header.push(text),
                Some(i) => anchors.attach(events[i].anchor.clone(), Side::Before, text),
                None => anchors.footer.push(text),
            }
        }
        anchors
    }

    fn attach(&mut self, anchor: Anchor, side: Side, text: String) {
        self.attached.entry((anchor, side)).or_default().push(text);
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.footer.len() + self.attached.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a statement, block opener or block closer sits in the source.
struct Event {
    start: (usize, usize),
    /// Last line of a statement; openers and closers span one line.
    end_line: usize,
    anchor: Anchor,
}

impl Event {
    fn at(line: usize, column: usize, anchor: Anchor) -> Self {
        Event {
            start: (line, column),
            end_line: line,
            anchor,
        }
    }

    /// A statement still open on `line`.
    fn encloses(&self, line: usize) -> bool {
        matches!(self.anchor, Anchor::Mapping { .. }) && line <= self.end_line
    }
}

/// Statement positions of a parsed document in source order.
fn events(ast: &Ast) -> Vec<Event> {
    let mut out = Vec::new();
    for import in &ast.imports {
        out.push(Event::at(import.line, import.column, Anchor::Import(import.path.clone())));
    }
    scope_events(&mut out, None, &ast.global_mappings, &ast.global_layers);
    for block in &ast.device_blocks {
        out.push(Event::at(
            block.start_line,
            block.start_column,
            Anchor::DeviceOpen(block.pattern.clone()),
        ));
        scope_events(&mut out, Some(block.pattern.as_str()), &block.mappings, &block.layers);
        out.push(Event::at(
            block.end_line,
            block.end_column,
            Anchor::DeviceClose(block.pattern.clone()),
        ));
    }
    out.sort_by_key(|e| e.start);
    out
}

fn scope_events(out: &mut Vec<Event>, device: Option<&str>, mappings: &[Mapping], layers: &[Layer]) {
    let device = device.map(str::to_string);
    for m in mappings {
        out.push(mapping_event(&device, None, m));
    }
    for layer in layers {
        out.push(Event::at(
            layer.start_line,
            layer.start_column,
            Anchor::LayerOpen {
                device: device.clone(),
                name: layer.name.clone(),
            },
        ));
        for m in &layer.mappings {
            out.push(mapping_event(&device, Some(layer.name.as_str()), m));
        }
        out.push(Event::at(
            layer.end_line,
            layer.end_column,
            Anchor::LayerClose {
                device: device.clone(),
                name: layer.name.clone(),
            },
        ));
    }
}

fn mapping_event(device: &Option<String>, layer: Option<&str>, m: &Mapping) -> Event {
    Event {
        start: (m.line, m.column),
        end_line: m.end_line.max(m.line),
        anchor: mapping_anchor(device, layer, m),
    }
}

fn mapping_anchor(device: &Option<String>, layer: Option<&str>, m: &Mapping) -> Anchor {
    Anchor::Mapping {
        device: device.clone(),
        layer: layer.map(str::to_string),
        key: m.source_key.clone(),
    }
}

/// Comment text without trailing whitespace on any of its lines.
fn normalize(text: &str) -> String {
    text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// One mapping statement, including the terminating `;`.
pub fn format_mapping(m: &Mapping) -> String {
    let key = quote(&m.source_key);
    match &m.action {
        Action::Simple { target_key } => format!("map({}, {});", key, quote(target_key)),
        Action::TapHold {
            tap,
            hold,
            threshold_ms,
        } => format!("tap_hold({}, {}, {}, {});", key, quote(tap), quote(hold), threshold_ms),
        Action::LayerSwitch { target_layer } => {
            format!("layer_switch({}, {});", key, quote(target_layer))
        }
        Action::ModifiedOutput {
            target_key,
            shift,
            ctrl,
            alt,
            win,
        } => {
            let single = match (shift, ctrl, alt, win) {
                (true, false, false, false) => Some("with_shift"),
                (false, true, false, false) => Some("with_ctrl"),
                (false, false, true, false) => Some("with_alt"),
                (false, false, false, true) => Some("with_win"),
                _ => None,
            };
            match single {
                Some(modifier) => format!("map({}, {}({}));", key, modifier, quote(target_key)),
                None => format!(
                    "with_mods({}, {}, {}, {}, {}, {});",
                    key,
                    quote(target_key),
                    shift,
                    ctrl,
                    alt,
                    win
                ),
            }
        }
        Action::Macro { steps } => {
            let steps: Vec<String> = steps
                .iter()
                .map(|step| match step {
                    MacroStep::Press(k) => format!("press({})", quote(k)),
                    MacroStep::Release(k) => format!("release({})", quote(k)),
                    MacroStep::Tap(k) => format!("tap({})", quote(k)),
                    MacroStep::Wait(ms) => format!("wait({})", ms),
                })
                .collect();
            format!("macro({}, [{}]);", key, steps.join(", "))
        }
    }
}

struct Renderer {
    out: String,
    /// 1-based line the cursor is on.
    line: usize,
    depth: usize,
    anchors: CommentAnchors,
    comments: Vec<Comment>,
    sections: usize,
}

impl Renderer {
    fn new(anchors: CommentAnchors) -> Self {
        Renderer {
            out: String::new(),
            line: 1,
            depth: 0,
            anchors,
            comments: Vec::new(),
            sections: 0,
        }
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.line += 1;
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    fn section(&mut self) {
        if self.sections > 0 {
            self.newline();
        }
        self.sections += 1;
    }

    /// 1-based column the cursor is on.
    fn column(&self) -> usize {
        self.out.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1
    }

    fn write_comment(&mut self, text: &str, trailing: bool) {
        let column = self.column();
        let kind = if text.starts_with("/*") {
            CommentKind::Block
        } else {
            CommentKind::Line
        };
        self.comments.push(Comment {
            text: text.to_string(),
            kind,
            line: self.line,
            column,
            trailing,
        });
        self.out.push_str(text);
        self.line += text.matches('\n').count();
    }

    fn comment_line(&mut self, text: &str) {
        self.indent();
        self.write_comment(text, false);
        self.newline();
    }

    /// Write one line of code with its anchored comments; returns where the
    /// code starts.
    fn statement(&mut self, anchor: &Anchor, code: &str) -> (usize, usize) {
        if let Some(texts) = self.anchors.attached.remove(&(anchor.clone(), Side::Before)) {
            for text in &texts {
                self.comment_line(text);
            }
        }
        self.indent();
        let start = (self.line, self.column());
        self.out.push_str(code);
        let mut overflow = Vec::new();
        if let Some(texts) = self.anchors.attached.remove(&(anchor.clone(), Side::After)) {
            let mut open_line_comment = false;
            for text in texts {
                if open_line_comment {
                    overflow.push(text);
                    continue;
                }
                self.out.push(' ');
                self.write_comment(&text, true);
                open_line_comment = text.starts_with("//");
            }
        }
        self.newline();
        // Nothing can follow a line comment on the same line.
        for text in &overflow {
            self.comment_line(text);
        }
        start
    }

    fn mappings(&mut self, device: &Option<String>, layer: Option<&str>, mappings: &[Mapping]) -> Vec<Mapping> {
        mappings
            .iter()
            .map(|m| {
                let (line, column) = self.statement(&mapping_anchor(device, layer, m), &format_mapping(m));
                Mapping {
                    line,
                    column,
                    end_line: line,
                    ..m.clone()
                }
            })
            .collect()
    }

    fn scope(&mut self, device: Option<&str>, mappings: &[Mapping], layers: &[Layer]) -> (Vec<Mapping>, Vec<Layer>) {
        let device = device.map(str::to_string);
        let mappings = self.mappings(&device, None, mappings);
        let layers = layers
            .iter()
            .map(|layer| {
                let (start_line, start_column) = self.statement(
                    &Anchor::LayerOpen {
                        device: device.clone(),
                        name: layer.name.clone(),
                    },
                    &format!("layer({}) {{", quote(&layer.name)),
                );
                self.depth += 1;
                let mappings = self.mappings(&device, Some(layer.name.as_str()), &layer.mappings);
                self.depth -= 1;
                let (end_line, end_column) = self.statement(
                    &Anchor::LayerClose {
                        device: device.clone(),
                        name: layer.name.clone(),
                    },
                    "}",
                );
                Layer {
                    name: layer.name.clone(),
                    mappings,
                    start_line,
                    start_column,
                    end_line,
                    end_column,
                }
            })
            .collect();
        (mappings, layers)
    }
}

/// Render `doc` (positions and comments ignored) with `anchors` re-attached.
/// Returns the text and the AST describing exactly that text.
pub fn render(doc: &Ast, anchors: CommentAnchors) -> (String, Ast) {
    let mut r = Renderer::new(anchors);
    let mut ast = Ast::default();

    for text in std::mem::take(&mut r.anchors.header) {
        r.comment_line(&text);
    }

    if !doc.imports.is_empty() {
        r.section();
        for import in &doc.imports {
            let (line, column) = r.statement(
                &Anchor::Import(import.path.clone()),
                &format!("import {};", quote(&import.path)),
            );
            ast.imports.push(Import {
                path: import.path.clone(),
                line,
                column,
            });
        }
    }

    if !doc.global_mappings.is_empty() || !doc.global_layers.is_empty() {
        r.section();
        let (mappings, layers) = r.scope(None, &doc.global_mappings, &doc.global_layers);
        ast.global_mappings = mappings;
        ast.global_layers = layers;
    }

    for block in &doc.device_blocks {
        r.section();
        let (start_line, start_column) = r.statement(
            &Anchor::DeviceOpen(block.pattern.clone()),
            &format!("device({}) {{", quote(&block.pattern)),
        );
        r.depth += 1;
        let (mappings, layers) = r.scope(Some(block.pattern.as_str()), &block.mappings, &block.layers);
        r.depth -= 1;
        let (end_line, end_column) = r.statement(&Anchor::DeviceClose(block.pattern.clone()), "}");
        ast.device_blocks.push(DeviceBlock {
            pattern: block.pattern.clone(),
            mappings,
            layers,
            start_line,
            start_column,
            end_line,
            end_column,
        });
    }

    for text in std::mem::take(&mut r.anchors.footer) {
        r.comment_line(&text);
    }

    let dropped: usize = r.anchors.attached.values().map(Vec::len).sum();
    if dropped > 0 {
        tracing::debug!(dropped, "comments lost their anchor");
    }

    ast.comments = r.comments;
    (r.out, ast)
}

/// Parse and re-render in canonical layout, keeping every comment.
pub fn format_source(source: &str) -> Result<String, ParseError> {
    let ast = parse(source)?;
    let anchors = CommentAnchors::collect(&ast);
    Ok(render(&ast, anchors).0)
}
