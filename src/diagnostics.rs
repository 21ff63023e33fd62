//! Diagnostics: syntax errors, semantic validation and the error surface the
//! editor paints and navigates.
//!
//! A [`DiagnosticSet`] is replaced wholesale on every parse attempt. Any
//! [`Severity::Error`] entry is blocking: save is refused and the document
//! is not projected.

use crate::ast::{Action, Ast, Layer, MacroStep, Mapping};
use crate::error::ParseError;
use crate::keys;
use crate::lint::{self, LintMessage};
use crate::visual::BASE_LAYER;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Which stage produced the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticSource {
    Syntax,
    Validation,
    Style,
}

/// A positioned message. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub length: usize,
    pub message: String,
    pub severity: Severity,
    pub source: DiagnosticSource,
}

impl Diagnostic {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }

    fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }
}

impl From<ParseError> for Diagnostic {
    fn from(e: ParseError) -> Self {
        Diagnostic {
            line: e.line,
            column: e.column,
            length: e.length.max(1),
            message: e.message,
            severity: Severity::Error,
            source: DiagnosticSource::Syntax,
        }
    }
}

impl From<LintMessage> for Diagnostic {
    fn from(m: LintMessage) -> Self {
        Diagnostic {
            line: m.line,
            column: m.column,
            length: 1,
            message: m.message,
            severity: Severity::Warning,
            source: DiagnosticSource::Style,
        }
    }
}

/// Current diagnostics, kept sorted by `(line, column)`.
///
/// After a successful parse the set holds no blocking entries, but it may
/// still carry warnings (unknown key names, undeclared layer targets, style)
/// unless those checks are turned off in [`CheckOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DiagnosticSet {
    items: Vec<Diagnostic>,
}

impl DiagnosticSet {
    pub fn new(mut items: Vec<Diagnostic>) -> Self {
        items.sort_by_key(|d| (d.line, d.column, d.severity));
        DiagnosticSet { items }
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_blocking_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_blocking)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_blocking()).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> + Clone {
        self.items.iter().filter(|d| d.is_blocking())
    }

    /// Next blocking error strictly after the cursor, wrapping to the first.
    pub fn next_error(&self, line: usize, column: usize) -> Option<&Diagnostic> {
        next_after(self.errors(), (line, column))
    }

    /// Next diagnostic of any severity strictly after the cursor, wrapping.
    pub fn next_diagnostic(&self, line: usize, column: usize) -> Option<&Diagnostic> {
        next_after(self.items.iter(), (line, column))
    }
}

fn next_after<'a>(
    mut items: impl Iterator<Item = &'a Diagnostic> + Clone,
    cursor: (usize, usize),
) -> Option<&'a Diagnostic> {
    let first = items.clone().next();
    items.find(|d| d.position() > cursor).or(first)
}

/// Which checks [`check`] runs in addition to syntax.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    pub key_warnings: bool,
    pub style_warnings: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            key_warnings: true,
            style_warnings: false,
        }
    }
}

/// Parse and validate in one step: `Ok` carries the AST and its
/// non-blocking diagnostics, `Err` the blocking ones (plus any warnings).
pub fn check(source: &str, options: CheckOptions) -> Result<(Ast, DiagnosticSet), DiagnosticSet> {
    match crate::parser::parse(source) {
        Ok(ast) => {
            let diagnostics = analyze(&ast, source, options);
            if diagnostics.has_blocking_errors() {
                Err(diagnostics)
            } else {
                Ok((ast, diagnostics))
            }
        }
        Err(e) => Err(DiagnosticSet::new(vec![e.into()])),
    }
}

/// Semantic validation plus the optional style lint.
pub fn analyze(ast: &Ast, source: &str, options: CheckOptions) -> DiagnosticSet {
    let mut items = validate(ast, source, options);
    if options.style_warnings {
        items.extend(lint::lint(source).into_iter().map(Diagnostic::from));
    }
    DiagnosticSet::new(items)
}

/// Semantic checks over a parsed document.
pub fn validate(ast: &Ast, source: &str, options: CheckOptions) -> Vec<Diagnostic> {
    let mut v = Validator {
        lines: source.lines().collect(),
        options,
        out: Vec::new(),
    };

    let mut imports = HashSet::new();
    for import in &ast.imports {
        if !imports.insert(import.path.as_str()) {
            v.warning(import.line, Some(import.path.as_str()), format!("duplicate import {:?}", import.path));
        }
    }

    let global_layers: HashSet<&str> = ast.global_layers.iter().map(|l| l.name.as_str()).collect();
    v.scope("global scope", &ast.global_mappings, &ast.global_layers, &global_layers);

    let mut patterns: HashMap<&str, usize> = HashMap::new();
    for block in &ast.device_blocks {
        if let Some(first) = patterns.get(block.pattern.as_str()) {
            v.error(
                block.start_line,
                Some(block.pattern.as_str()),
                format!(
                    "duplicate device pattern {:?} (first declared on line {})",
                    block.pattern, first
                ),
            );
        } else {
            patterns.insert(&block.pattern, block.start_line);
        }
        v.scope(
            &format!("device {:?}", block.pattern),
            &block.mappings,
            &block.layers,
            &global_layers,
        );
    }
    v.out
}

struct Validator<'a> {
    lines: Vec<&'a str>,
    options: CheckOptions,
    out: Vec<Diagnostic>,
}

impl Validator<'_> {
    fn scope(&mut self, label: &str, mappings: &[Mapping], layers: &[Layer], global_layers: &HashSet<&str>) {
        let mut names: HashMap<&str, usize> = HashMap::new();
        for layer in layers {
            if layer.name == BASE_LAYER {
                self.error(
                    layer.start_line,
                    Some(layer.name.as_str()),
                    format!("layer name {:?} is reserved for the default layer", BASE_LAYER),
                );
            }
            if let Some(first) = names.get(layer.name.as_str()) {
                self.error(
                    layer.start_line,
                    Some(layer.name.as_str()),
                    format!(
                        "duplicate layer {:?} in {} (first declared on line {})",
                        layer.name, label, first
                    ),
                );
            } else {
                names.insert(&layer.name, layer.start_line);
            }
        }
        let declared = |name: &str| names.contains_key(name) || global_layers.contains(name);

        self.mappings(label, BASE_LAYER, mappings, &declared);
        for layer in layers {
            self.mappings(label, &layer.name, &layer.mappings, &declared);
        }
    }

    fn mappings(&mut self, label: &str, layer: &str, mappings: &[Mapping], declared: &dyn Fn(&str) -> bool) {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for m in mappings {
            if let Some(first) = seen.get(m.source_key.as_str()) {
                self.error(
                    m.line,
                    Some(m.source_key.as_str()),
                    format!(
                        "key {:?} is already mapped in {} layer {:?} (line {})",
                        m.source_key, label, layer, first
                    ),
                );
            } else {
                seen.insert(&m.source_key, m.line);
            }
            self.mapping(m, declared);
        }
    }

    fn mapping(&mut self, m: &Mapping, declared: &dyn Fn(&str) -> bool) {
        if self.options.key_warnings {
            if let Err(msg) = keys::check_input(&m.source_key) {
                self.warning(m.line, Some(m.source_key.as_str()), msg);
            }
        }
        match &m.action {
            Action::Simple { target_key } => self.output_key(m.line, target_key),
            Action::TapHold {
                tap,
                hold,
                threshold_ms,
            } => {
                self.output_key(m.line, tap);
                self.output_key(m.line, hold);
                if *threshold_ms == 0 || *threshold_ms > u16::MAX as u32 {
                    self.error(
                        m.line,
                        Some(threshold_ms.to_string().as_str()),
                        format!("tap-hold threshold must be 1-{} ms, got {}", u16::MAX, threshold_ms),
                    );
                }
            }
            Action::LayerSwitch { target_layer } => {
                if !declared(target_layer) {
                    self.warning(
                        m.line,
                        Some(target_layer.as_str()),
                        format!("layer {:?} is not declared in this scope", target_layer),
                    );
                }
            }
            Action::ModifiedOutput {
                target_key,
                shift,
                ctrl,
                alt,
                win,
            } => {
                self.output_key(m.line, target_key);
                if !(*shift || *ctrl || *alt || *win) {
                    self.warning(
                        m.line,
                        Some("with_mods"),
                        "with_mods without any modifier; use map(...) instead".to_string(),
                    );
                }
            }
            Action::Macro { steps } => {
                for step in steps {
                    match step {
                        MacroStep::Press(k) | MacroStep::Release(k) | MacroStep::Tap(k) => {
                            self.output_key(m.line, k)
                        }
                        MacroStep::Wait(ms) if *ms > u16::MAX as u32 => self.error(
                            m.line,
                            Some(ms.to_string().as_str()),
                            format!("macro wait must be at most {} ms, got {}", u16::MAX, ms),
                        ),
                        MacroStep::Wait(_) => {}
                    }
                }
            }
        }
    }

    fn output_key(&mut self, line: usize, name: &str) {
        if !self.options.key_warnings {
            return;
        }
        if let Err(msg) = keys::check_output(name) {
            self.warning(line, Some(name), msg);
        }
    }

    fn error(&mut self, line: usize, needle: Option<&str>, message: String) {
        self.push(line, needle, message, Severity::Error);
    }

    fn warning(&mut self, line: usize, needle: Option<&str>, message: String) {
        self.push(line, needle, message, Severity::Warning);
    }

    /// Position the diagnostic on `needle` within the line when it occurs
    /// there, otherwise on the statement's first character.
    fn push(&mut self, line: usize, needle: Option<&str>, message: String, severity: Severity) {
        let text = self.lines.get(line.wrapping_sub(1)).copied().unwrap_or("");
        let (column, length) = needle
            .and_then(|n| locate(text, n))
            .unwrap_or_else(|| {
                let indent = text.len() - text.trim_start().len();
                (text[..indent].chars().count() + 1, text.trim().chars().count().max(1))
            });
        self.out.push(Diagnostic {
            line,
            column,
            length,
            message,
            severity,
            source: DiagnosticSource::Validation,
        });
    }
}

/// 1-based column and length of `needle` in `text`, preferring its quoted form.
fn locate(text: &str, needle: &str) -> Option<(usize, usize)> {
    let quoted = crate::parser::quote(needle);
    let (at, len) = match text.find(&quoted) {
        Some(i) => (i, quoted.chars().count()),
        None => (text.find(needle)?, needle.chars().count()),
    };
    Some((text[..at].chars().count() + 1, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diags(src: &str) -> DiagnosticSet {
        match check(src, CheckOptions::default()) {
            Ok((_, d)) | Err(d) => d,
        }
    }

    #[test]
    fn duplicate_device_pattern_is_blocking() {
        let d = diags("device(\"SN-1\") { map(\"A\", \"B\"); }\ndevice(\"SN-1\") { map(\"C\", \"D\"); }\n");
        assert!(d.has_blocking_errors());
        let e = d.errors().next().unwrap();
        assert_eq!(e.line, 2);
        assert_eq!(e.column, 8);
        assert!(e.message.contains("first declared on line 1"));
    }

    #[test]
    fn duplicate_key_in_layer_is_blocking() {
        let d = diags("map(\"A\", \"B\");\nmap(\"A\", \"C\");\n");
        assert_eq!(d.error_count(), 1);
        assert_eq!(d.errors().next().unwrap().line, 2);
    }

    #[test]
    fn same_key_in_different_layers_is_fine() {
        let d = diags("map(\"A\", \"B\");\nlayer(\"nav\") { map(\"A\", \"Left\"); }\n");
        assert!(!d.has_blocking_errors());
    }

    #[test]
    fn unknown_key_is_a_warning() {
        let d = diags("map(\"Capslok\", \"Escape\");\n");
        assert!(!d.has_blocking_errors());
        assert_eq!(d.len(), 1);
        assert_eq!(d.items()[0].severity, Severity::Warning);
        assert!(d.items()[0].message.contains("CapsLock"));
        assert_eq!(d.items()[0].column, 5);
    }

    #[test]
    fn threshold_and_reserved_layer() {
        let d = diags("tap_hold(\"Space\", \"Space\", \"MD_00\", 0);\nlayer(\"base\") { }\n");
        assert_eq!(d.error_count(), 2);
    }

    #[test]
    fn undeclared_layer_switch_warns() {
        let d = diags("layer_switch(\"CapsLock\", \"nav\");\n");
        assert!(!d.has_blocking_errors());
        assert_eq!(d.len(), 1);
        let d = diags("layer_switch(\"CapsLock\", \"nav\");\nlayer(\"nav\") { }\n");
        assert!(d.is_empty());
    }

    #[test]
    fn syntax_error_becomes_single_diagnostic() {
        let d = diags("map(\"A\",\"B\"");
        assert_eq!(d.len(), 1);
        assert_eq!(d.items()[0].source, DiagnosticSource::Syntax);
    }

    #[test]
    fn next_error_cycles_in_position_order() {
        let mk = |line, column| Diagnostic {
            line,
            column,
            length: 1,
            message: String::new(),
            severity: Severity::Error,
            source: DiagnosticSource::Validation,
        };
        let set = DiagnosticSet::new(vec![mk(5, 1), mk(2, 7), mk(2, 3)]);
        let a = set.next_error(0, 0).unwrap();
        assert_eq!((a.line, a.column), (2, 3));
        let b = set.next_error(a.line, a.column).unwrap();
        assert_eq!((b.line, b.column), (2, 7));
        let c = set.next_error(b.line, b.column).unwrap();
        assert_eq!((c.line, c.column), (5, 1));
        let wrapped = set.next_error(c.line, c.column).unwrap();
        assert_eq!((wrapped.line, wrapped.column), (2, 3));
    }
}
