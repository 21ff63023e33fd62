//! Linter for the keymap DSL: style rules that never block a save.
//!
//! ## Rules
//!
//! - **Indentation**: four spaces per depth level, no tabs. Depth increases after `{`, decreases at `}`.
//! - **One statement per line**: at most one `;` terminator per line.
//! - **Closing brace alone**: a line containing `}` must not also contain a statement.
//! - **No trailing whitespace**.
//!
//! Text produced by the serializer satisfies every rule. Run the checker via the
//! `keymap_check` binary with `--style`.

use crate::diagnostics::Severity;

pub const INDENT: &str = "    ";

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    /// Indentation must use spaces only.
    IndentationSpacesOnly,
    /// Indentation must be exactly four spaces per depth level.
    IndentationDepth,
    /// At most one statement per line.
    OneStatementPerLine,
    /// Closing `}` should be the only code on its line.
    ClosingBraceAlone,
    NoTrailingWhitespace,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::IndentationSpacesOnly => "indentation-spaces-only",
            LintRule::IndentationDepth => "indentation-depth",
            LintRule::OneStatementPerLine => "one-statement-per-line",
            LintRule::ClosingBraceAlone => "closing-brace-alone",
            LintRule::NoTrailingWhitespace => "no-trailing-whitespace",
        }
    }
}

/// A single lint message with location.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub line: usize,
    pub column: usize,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

/// Byte offset of the first `//` or `/*` outside a string literal.
fn comment_start(line: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b'/' && matches!(bytes.get(i + 1), Some(b'/') | Some(b'*')) {
            return Some(i);
        }
    }
    None
}

/// Code part of a line: everything before a comment.
fn code_part(line: &str) -> &str {
    match comment_start(line) {
        Some(i) => line[..i].trim_end(),
        None => line,
    }
}

/// The line opens a block comment that continues on the next line.
fn opens_block_comment(line: &str) -> bool {
    match comment_start(line) {
        Some(i) if line[i..].starts_with("/*") => !line[i + 2..].contains("*/"),
        _ => false,
    }
}

/// Counts of (`{`, `}`, `;`) outside string literals.
fn structure(code: &str) -> (i32, i32, usize) {
    let (mut open, mut close, mut semis) = (0, 0, 0);
    let mut in_string = false;
    let mut escaped = false;
    for c in code.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => open += 1,
            '}' => close += 1,
            ';' => semis += 1,
            _ => {}
        }
    }
    (open, close, semis)
}

/// Run all lint rules on DSL source. Returns messages in line order.
pub fn lint(source: &str) -> Vec<LintMessage> {
    let mut out = Vec::new();
    let mut depth: i32 = 0;
    let mut in_block_comment = false;

    for (i, line) in source.lines().enumerate() {
        let line_no = i + 1;
        if in_block_comment {
            in_block_comment = !line.contains("*/");
            continue;
        }
        let mut push = |column: usize, rule: LintRule, message: String| {
            out.push(LintMessage {
                line: line_no,
                column,
                rule,
                severity: Severity::Warning,
                message,
            })
        };

        if line != line.trim_end() {
            push(
                line.trim_end().chars().count() + 1,
                LintRule::NoTrailingWhitespace,
                "trailing whitespace".to_string(),
            );
        }

        let trimmed = line.trim_start();
        let leading = &line[..line.len() - trimmed.len()];
        let code = code_part(trimmed);
        let (open, close, semis) = structure(code);

        if leading.contains('\t') {
            push(1, LintRule::IndentationSpacesOnly, "indent with spaces, not tabs".to_string());
        }

        // A line starting with `}` belongs to the enclosing depth.
        let expected_depth = if code.starts_with('}') { depth - 1 } else { depth }.max(0) as usize;
        let is_comment_only = trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*');
        if !trimmed.is_empty() && !is_comment_only && leading.len() != expected_depth * INDENT.len() {
            push(
                1,
                LintRule::IndentationDepth,
                format!(
                    "expected {} space(s) of indentation at depth {} (found {})",
                    expected_depth * INDENT.len(),
                    expected_depth,
                    leading.chars().count()
                ),
            );
        }

        if semis > 1 {
            push(
                leading.len() + 1,
                LintRule::OneStatementPerLine,
                format!("one statement per line (found {})", semis),
            );
        }

        if close > 0 && semis > 0 {
            push(
                leading.len() + 1,
                LintRule::ClosingBraceAlone,
                "closing `}` should be alone on its line".to_string(),
            );
        }

        depth += open - close;
        in_block_comment = opens_block_comment(trimmed);
    }

    out
}

/// Whitespace-only fix for source that may not parse: re-indent by depth,
/// split statements onto their own lines, strip trailing whitespace.
pub fn lint_fix(source: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_block_comment = false;
    let mut out_lines: Vec<String> = Vec::new();
    for line in source.lines() {
        if in_block_comment {
            in_block_comment = !line.contains("*/");
            out_lines.push(line.trim_end().to_string());
            continue;
        }
        let trimmed = line.trim();
        in_block_comment = opens_block_comment(trimmed);
        if trimmed.is_empty() {
            out_lines.push(String::new());
            continue;
        }
        let code = code_part(trimmed);
        let comment = trimmed[code.len()..].trim();
        let (_, _, semis) = structure(code);

        let pieces: Vec<String> = if semis > 1 || (semis > 0 && code.contains('}')) {
            split_statements(code)
        } else {
            vec![code.to_string()]
        };
        let last = pieces.len().saturating_sub(1);
        for (j, piece) in pieces.iter().enumerate() {
            let (open, close, _) = structure(piece);
            let piece_depth = if piece.starts_with('}') { depth - 1 } else { depth };
            let indent = INDENT.repeat(piece_depth.max(0) as usize);
            let text = match (j == last, comment.is_empty(), piece.is_empty()) {
                (true, false, true) => comment.to_string(),
                (true, false, false) => format!("{} {}", piece, comment),
                _ => piece.clone(),
            };
            out_lines.push(format!("{}{}", indent, text));
            depth += open - close;
        }
    }
    out_lines.join("\n") + "\n"
}

/// Split code after every top-level `;`, `{` and before every `}`.
fn split_statements(code: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in code.chars() {
        if in_string {
            current.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            ';' | '{' => {
                current.push(c);
                pieces.push(std::mem::take(&mut current).trim().to_string());
            }
            '}' => {
                if !current.trim().is_empty() {
                    pieces.push(std::mem::take(&mut current).trim().to_string());
                }
                current.clear();
                pieces.push("}".to_string());
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}
