//! Parse keymap DSL source into an [`Ast`] using PEST.
//!
//! Parsing is a pure function of the input: no parser instance outlives a
//! call, and the first blocking fault is reported as a [`ParseError`].

use crate::ast::*;
use crate::error::ParseError;
use pest::error::{ErrorVariant, InputLocation, LineColLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct KeymapParser;

/// Parse keymap source into AST.
pub fn parse(source: &str) -> Result<Ast, ParseError> {
    let mut pairs = KeymapParser::parse(Rule::keymap, source).map_err(|e| convert_error(source, e))?;
    let root = pairs
        .next()
        .ok_or_else(|| ParseError::new(1, 1, "empty parse"))?;
    build_keymap(source, root)
}

fn build_keymap(source: &str, pair: Pair<Rule>) -> Result<Ast, ParseError> {
    let comments = pair
        .clone()
        .into_inner()
        .flatten()
        .filter(|p| p.as_rule() == Rule::COMMENT)
        .map(|p| build_comment(source, p))
        .collect();

    let mut ast = Ast {
        comments,
        ..Ast::default()
    };
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::import_stmt => ast.imports.push(build_import(inner)?),
            Rule::device_block => ast.device_blocks.push(build_device(inner)?),
            Rule::layer_block => ast.global_layers.push(build_layer(inner)?),
            r if is_mapping(r) => ast.global_mappings.push(build_mapping(inner)?),
            _ => {}
        }
    }
    Ok(ast)
}

fn build_comment(source: &str, pair: Pair<Rule>) -> Comment {
    let start = pair.as_span().start();
    let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let trailing = !source[line_start..start].trim().is_empty();
    // COMMENT runs inside an implicit atomic skip, so it has no inner pairs.
    let kind = if pair.as_str().starts_with("/*") {
        CommentKind::Block
    } else {
        CommentKind::Line
    };
    let (line, column) = pair.as_span().start_pos().line_col();
    Comment {
        text: pair.as_str().trim_end_matches('\r').to_string(),
        kind,
        line,
        column,
        trailing,
    }
}

fn build_import(pair: Pair<Rule>) -> Result<Import, ParseError> {
    let (line, column) = pair.as_span().start_pos().line_col();
    let path_pair = strings(pair).next().ok_or_else(|| ParseError::new(line, column, "import: missing path"))?;
    Ok(Import {
        path: non_empty_string(path_pair, "import path")?,
        line,
        column,
    })
}

fn build_device(pair: Pair<Rule>) -> Result<DeviceBlock, ParseError> {
    let ((start_line, start_column), (end_line, end_column)) = block_range(&pair);
    let mut pattern = None;
    let mut mappings = Vec::new();
    let mut layers = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::string => pattern = Some(non_empty_string(inner, "device pattern")?),
            Rule::layer_block => layers.push(build_layer(inner)?),
            r if is_mapping(r) => mappings.push(build_mapping(inner)?),
            _ => {}
        }
    }
    Ok(DeviceBlock {
        pattern: pattern.ok_or_else(|| ParseError::new(start_line, start_column, "device: missing pattern"))?,
        mappings,
        layers,
        start_line,
        start_column,
        end_line,
        end_column,
    })
}

fn build_layer(pair: Pair<Rule>) -> Result<Layer, ParseError> {
    let ((start_line, start_column), (end_line, end_column)) = block_range(&pair);
    let mut name = None;
    let mut mappings = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::string => name = Some(non_empty_string(inner, "layer name")?),
            r if is_mapping(r) => mappings.push(build_mapping(inner)?),
            _ => {}
        }
    }
    Ok(Layer {
        name: name.ok_or_else(|| ParseError::new(start_line, start_column, "layer: missing name"))?,
        mappings,
        start_line,
        start_column,
        end_line,
        end_column,
    })
}

fn build_mapping(pair: Pair<Rule>) -> Result<Mapping, ParseError> {
    let span = pair.as_span();
    let (line, column) = span.start_pos().line_col();
    let end_line = span.end_pos().line_col().0;
    let rule = pair.as_rule();
    let missing = |what: &str| ParseError::new(line, column, format!("{}: missing {}", rule_label(rule), what));
    let mut it = pair.into_inner().filter(|p| is_argument(p.as_rule()));
    let source_key = non_empty_string(it.next().ok_or_else(|| missing("source key"))?, "source key")?;
    let action = match rule {
        Rule::map_stmt => {
            let target = it.next().ok_or_else(|| missing("target key"))?;
            if target.as_rule() == Rule::modified_key {
                build_modified_key(target)?
            } else {
                Action::Simple {
                    target_key: non_empty_string(target, "target key")?,
                }
            }
        }
        Rule::with_mods_stmt => {
            let target_key = non_empty_string(it.next().ok_or_else(|| missing("target key"))?, "target key")?;
            let mut flag = |what: &str| -> Result<bool, ParseError> {
                Ok(it.next().ok_or_else(|| missing(what))?.as_str() == "true")
            };
            Action::ModifiedOutput {
                target_key,
                shift: flag("shift flag")?,
                ctrl: flag("ctrl flag")?,
                alt: flag("alt flag")?,
                win: flag("win flag")?,
            }
        }
        Rule::tap_hold_stmt => {
            let tap = non_empty_string(it.next().ok_or_else(|| missing("tap key"))?, "tap key")?;
            let hold = non_empty_string(it.next().ok_or_else(|| missing("hold action"))?, "hold action")?;
            let threshold_ms = build_number(it.next().ok_or_else(|| missing("threshold"))?)?;
            Action::TapHold {
                tap,
                hold,
                threshold_ms,
            }
        }
        Rule::layer_switch_stmt => Action::LayerSwitch {
            target_layer: non_empty_string(it.next().ok_or_else(|| missing("target layer"))?, "target layer")?,
        },
        Rule::macro_stmt => Action::Macro {
            steps: it.map(build_macro_step).collect::<Result<Vec<_>, _>>()?,
        },
        _ => return Err(ParseError::new(line, 1, format!("unhandled statement: {:?}", rule))),
    };
    Ok(Mapping {
        source_key,
        action,
        line,
        column,
        end_line,
    })
}

/// `with_shift("1")` and friends: a key with one modifier held.
fn build_modified_key(pair: Pair<Rule>) -> Result<Action, ParseError> {
    let (line, column) = pair.as_span().start_pos().line_col();
    let mut modifier = "";
    let mut key = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::modifier => modifier = inner.as_str(),
            Rule::string => key = Some(non_empty_string(inner, "target key")?),
            _ => {}
        }
    }
    let target_key = key.ok_or_else(|| ParseError::new(line, column, "modified key: missing target key"))?;
    Ok(Action::ModifiedOutput {
        target_key,
        shift: modifier == "with_shift",
        ctrl: modifier == "with_ctrl",
        alt: modifier == "with_alt",
        win: modifier == "with_win",
    })
}

fn build_macro_step(pair: Pair<Rule>) -> Result<MacroStep, ParseError> {
    let line = line_of(&pair);
    let rule = pair.as_rule();
    let arg = pair
        .into_inner()
        .find(|p| matches!(p.as_rule(), Rule::string | Rule::number))
        .ok_or_else(|| ParseError::new(line, 1, "macro step: missing argument"))?;
    match rule {
        Rule::press_step => Ok(MacroStep::Press(non_empty_string(arg, "macro key")?)),
        Rule::release_step => Ok(MacroStep::Release(non_empty_string(arg, "macro key")?)),
        Rule::tap_step => Ok(MacroStep::Tap(non_empty_string(arg, "macro key")?)),
        Rule::wait_step => Ok(MacroStep::Wait(build_number(arg)?)),
        _ => Err(ParseError::new(line, 1, format!("unhandled macro step: {:?}", rule))),
    }
}

fn is_mapping(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::map_stmt | Rule::tap_hold_stmt | Rule::layer_switch_stmt | Rule::with_mods_stmt | Rule::macro_stmt
    )
}

/// Statement arguments, skipping punctuation and comments.
fn is_argument(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::string
            | Rule::number
            | Rule::boolean
            | Rule::modified_key
            | Rule::press_step
            | Rule::release_step
            | Rule::tap_step
            | Rule::wait_step
    )
}

fn strings(pair: Pair<Rule>) -> impl Iterator<Item = Pair<Rule>> {
    pair.into_inner().filter(|p| p.as_rule() == Rule::string)
}

/// Unescape a string literal and reject the empty string.
fn non_empty_string(pair: Pair<Rule>, what: &str) -> Result<String, ParseError> {
    let (line, column) = pair.as_span().start_pos().line_col();
    let value = unescape(pair.as_str());
    if value.is_empty() {
        return Err(ParseError {
            line,
            column,
            length: pair.as_str().chars().count(),
            message: format!("{} must not be empty", what),
        });
    }
    Ok(value)
}

fn build_number(pair: Pair<Rule>) -> Result<u32, ParseError> {
    let (line, column) = pair.as_span().start_pos().line_col();
    pair.as_str().parse().map_err(|_| ParseError {
        line,
        column,
        length: pair.as_str().len(),
        message: format!("number out of range: {}", pair.as_str()),
    })
}

fn unescape(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Quote a value as a DSL string literal; inverse of the parser's unescape.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

/// Start of a block and position of its closing brace.
fn block_range(pair: &Pair<Rule>) -> ((usize, usize), (usize, usize)) {
    let span = pair.as_span();
    let (end_line, end_column) = span.end_pos().line_col();
    (span.start_pos().line_col(), (end_line, end_column - 1))
}

fn rule_label(rule: Rule) -> &'static str {
    match rule {
        Rule::EOI => "end of input",
        Rule::string | Rule::string_inner => "string literal",
        Rule::number => "number",
        Rule::boolean => "`true` or `false`",
        Rule::modified_key | Rule::modifier => "modified key",
        Rule::import_stmt => "import",
        Rule::device_block => "device block",
        Rule::layer_block => "layer block",
        Rule::map_stmt => "map(...)",
        Rule::tap_hold_stmt => "tap_hold(...)",
        Rule::layer_switch_stmt => "layer_switch(...)",
        Rule::with_mods_stmt => "with_mods(...)",
        Rule::macro_stmt => "macro(...)",
        Rule::press_step | Rule::release_step | Rule::tap_step | Rule::wait_step => "macro step",
        Rule::COMMENT | Rule::line_comment | Rule::block_comment => "comment",
        Rule::lparen => "`(`",
        Rule::rparen => "`)`",
        Rule::lbrace => "`{`",
        Rule::rbrace => "`}`",
        Rule::lbracket => "`[`",
        Rule::rbracket => "`]`",
        Rule::comma => "`,`",
        Rule::semi => "`;`",
        _ => "statement",
    }
}

fn convert_error(source: &str, e: pest::error::Error<Rule>) -> ParseError {
    let (line, column) = match e.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    let offset = match e.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((p, _)) => p,
    };
    let found = match source[offset..].chars().next() {
        None => "unexpected end of input".to_string(),
        Some(c) if c == '\n' || c == '\r' => "unexpected end of line".to_string(),
        Some(c) => format!("unexpected `{}`", c),
    };
    let message = match &e.variant {
        ErrorVariant::ParsingError { positives, .. }
            if source[offset..].starts_with('"') && positives.contains(&Rule::string) =>
        {
            "unterminated string literal".to_string()
        }
        ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            let mut labels: Vec<&str> = Vec::new();
            for label in positives.iter().map(|r| rule_label(*r)) {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            format!("{}, expected {}", found, labels.join(" or "))
        }
        ErrorVariant::CustomError { message } => message.clone(),
        _ => found,
    };
    ParseError {
        line,
        column,
        length: 1,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_roundtrips_through_unescape() {
        for s in ["plain", "with \"quotes\"", "back\\slash", "tab\there", "new\nline"] {
            assert_eq!(unescape(&quote(s)), s);
        }
    }

    #[test]
    fn unterminated_call_reports_position() {
        let err = parse("map(\"A\",\"B\"").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 12);
        assert!(err.message.contains("end of input"), "{}", err.message);
        assert!(err.message.contains("`)`"), "{}", err.message);
    }

    #[test]
    fn trailing_comment_detected() {
        let ast = parse("map(\"A\", \"B\"); // note\n// own line\n").unwrap();
        assert_eq!(ast.comments.len(), 2);
        assert!(ast.comments[0].trailing);
        assert!(!ast.comments[1].trailing);
        assert_eq!(ast.comments[1].line, 2);
    }

    #[test]
    fn block_comments_are_labelled_by_their_delimiters() {
        let ast = parse("/* block */\nmap(\"A\", \"B\"); // line\n").unwrap();
        assert_eq!(ast.comments[0].kind, CommentKind::Block);
        assert_eq!(ast.comments[1].kind, CommentKind::Line);
        assert_eq!(ast.comments[1].column, 16);
    }

    #[test]
    fn block_positions_point_at_braces() {
        let ast = parse("  layer(\"n\") {\n    map(\"A\", \"B\");\n  }\n").unwrap();
        let layer = &ast.global_layers[0];
        assert_eq!((layer.start_line, layer.start_column), (1, 3));
        assert_eq!((layer.end_line, layer.end_column), (3, 3));
        let m = &layer.mappings[0];
        assert_eq!((m.line, m.column, m.end_line), (2, 5, 2));
    }

    #[test]
    fn empty_pattern_rejected_at_literal() {
        let err = parse("device(\"\") { }").unwrap_err();
        assert_eq!((err.line, err.column), (1, 8));
        assert!(err.message.contains("device pattern"));
    }
}
