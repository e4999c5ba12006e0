//! Parser for the task-graph specification language.
//!
//! A specification declares one task per statement and wires them with edge
//! chains:
//!
//! ```text
//! ds1       [type=http method=GET url="https://feeds.example.com/eth-usd"];
//! ds1_parse [type=jsonparse path="data,result"];
//! answer    [type=median min_answers=2];
//!
//! ds1 -> ds1_parse -> answer;
//! ```
//!
//! Statements end at `;` or at a newline outside an attribute list. `#` and
//! `//` start comments. An edge chain may carry a trailing attribute list
//! (`a -> b [optional=true];`) that applies to every edge in the chain.
//! Malformed statements are rejected with the offending line.

use std::time::Duration;

use crate::core::errors::SpecError;

/// A task declaration, before type-specific validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTask {
    pub id: String,
    pub task_type: String,
    /// All attributes except `type`, in declaration order.
    pub attrs: Vec<(String, String)>,
    pub line: usize,
}

/// One dependency edge, `from`'s output feeding `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEdge {
    pub from: String,
    pub to: String,
    /// Explicit optionality override; `None` leaves the default to the
    /// downstream task's type.
    pub optional: Option<bool>,
    pub line: usize,
}

/// The raw parse result, before graph validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSpec {
    pub tasks: Vec<ParsedTask>,
    pub edges: Vec<ParsedEdge>,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Quoted(String),
    Arrow,
    LBracket,
    RBracket,
    Eq,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Word(w) => format!("'{}'", w),
            Tok::Quoted(_) => "quoted string".to_string(),
            Tok::Arrow => "'->'".to_string(),
            Tok::LBracket => "'['".to_string(),
            Tok::RBracket => "']'".to_string(),
            Tok::Eq => "'='".to_string(),
        }
    }
}

fn parse_err(line: usize, message: impl Into<String>) -> SpecError {
    SpecError::Parse {
        line,
        message: message.into(),
    }
}

/// Parses a specification into tasks and edges.
pub fn parse(source: &str) -> Result<ParsedSpec, SpecError> {
    let mut spec = ParsedSpec::default();
    for (statement, line) in split_statements(source)? {
        let tokens = tokenize(&statement, line)?;
        if tokens.is_empty() {
            continue;
        }
        parse_statement(&tokens, line, &mut spec)?;
    }
    Ok(spec)
}

/// Splits the source into statements, tracking the line each starts on.
/// `;` always terminates; a newline terminates only outside `[...]`.
fn split_statements(source: &str) -> Result<Vec<(String, usize)>, SpecError> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start_line = 1;
    let mut line = 1;
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut chars = source.chars().peekable();

    let mut flush = |buf: &mut String, at: usize, statements: &mut Vec<(String, usize)>| {
        if !buf.trim().is_empty() {
            statements.push((std::mem::take(buf), at));
        } else {
            buf.clear();
        }
    };

    while let Some(c) = chars.next() {
        if in_quotes {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            } else if c == '\n' {
                return Err(parse_err(line, "unterminated string"));
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                current.push(c);
            }
            '#' => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ';' => flush(&mut current, start_line, &mut statements),
            '\n' => {
                if depth == 0 {
                    flush(&mut current, start_line, &mut statements);
                } else {
                    current.push(' ');
                }
                line += 1;
                if current.trim().is_empty() {
                    start_line = line;
                }
            }
            _ => {
                if current.trim().is_empty() && !c.is_whitespace() {
                    start_line = line;
                }
                current.push(c);
            }
        }
    }

    if in_quotes {
        return Err(parse_err(line, "unterminated string"));
    }
    flush(&mut current, start_line, &mut statements);
    Ok(statements)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn tokenize(statement: &str, line: usize) -> Result<Vec<Tok>, SpecError> {
    let mut tokens = Vec::new();
    let mut chars = statement.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '[' {
            chars.next();
            tokens.push(Tok::LBracket);
        } else if c == ']' {
            chars.next();
            tokens.push(Tok::RBracket);
        } else if c == '=' {
            chars.next();
            tokens.push(Tok::Eq);
        } else if c == '-' && statement_peek_arrow(&mut chars) {
            tokens.push(Tok::Arrow);
        } else if c == '"' {
            chars.next();
            tokens.push(Tok::Quoted(read_quoted(&mut chars, line)?));
        } else if is_word_char(c) || c == '$' || c == '(' {
            tokens.push(Tok::Word(read_word(&mut chars)));
        } else {
            return Err(parse_err(line, format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

/// Consumes `->` if present; a lone `-` is part of a word.
fn statement_peek_arrow(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut lookahead = chars.clone();
    lookahead.next();
    if lookahead.peek() == Some(&'>') {
        chars.next();
        chars.next();
        true
    } else {
        false
    }
}

fn read_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: usize,
) -> Result<String, SpecError> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some('"') => value.push('"'),
                Some('\\') => value.push('\\'),
                Some(other) => {
                    value.push('\\');
                    value.push(other);
                }
                None => break,
            },
            _ => value.push(c),
        }
    }
    Err(parse_err(line, "unterminated string"))
}

/// Reads a bare word; `$(...)` reference expressions are kept whole so
/// unquoted parameter values like `times=$(inputs.times)` survive. A `-`
/// belongs to the word (`eth-usd`, `-2`) unless it starts an `->` arrow.
fn read_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    let mut paren_depth = 0usize;
    while let Some(&c) = chars.peek() {
        if c == '-' {
            let mut lookahead = chars.clone();
            lookahead.next();
            if lookahead.peek() == Some(&'>') {
                break;
            }
        }
        if c == '$' || c == '(' {
            if c == '(' {
                paren_depth += 1;
            }
            word.push(c);
            chars.next();
        } else if c == ')' && paren_depth > 0 {
            paren_depth -= 1;
            word.push(c);
            chars.next();
        } else if is_word_char(c) || (paren_depth > 0 && !c.is_whitespace()) {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

fn parse_statement(
    tokens: &[Tok],
    line: usize,
    spec: &mut ParsedSpec,
) -> Result<(), SpecError> {
    let first = match &tokens[0] {
        Tok::Word(w) => w.clone(),
        other => {
            return Err(parse_err(
                line,
                format!("expected task name, found {}", other.describe()),
            ))
        }
    };
    validate_identifier(&first, line)?;

    match tokens.get(1) {
        Some(Tok::LBracket) => parse_task_decl(&first, &tokens[2..], line, spec),
        Some(Tok::Arrow) => parse_edge_chain(&first, &tokens[1..], line, spec),
        Some(other) => Err(parse_err(
            line,
            format!("expected '[' or '->' after '{}', found {}", first, other.describe()),
        )),
        None => Err(parse_err(
            line,
            format!("task '{}' declared without an attribute list", first),
        )),
    }
}

fn parse_task_decl(
    id: &str,
    rest: &[Tok],
    line: usize,
    spec: &mut ParsedSpec,
) -> Result<(), SpecError> {
    let (attrs, consumed) = parse_attr_list(rest, line)?;
    if consumed != rest.len() {
        return Err(parse_err(
            line,
            format!("unexpected tokens after attribute list of task '{}'", id),
        ));
    }

    let mut task_type = None;
    let mut remaining = Vec::new();
    for (key, value) in attrs {
        if key == "type" {
            if task_type.replace(value).is_some() {
                return Err(parse_err(line, format!("task '{}' declares 'type' twice", id)));
            }
        } else {
            remaining.push((key, value));
        }
    }

    let task_type = task_type
        .ok_or_else(|| parse_err(line, format!("task '{}' is missing a 'type' attribute", id)))?;

    spec.tasks.push(ParsedTask {
        id: id.to_string(),
        task_type,
        attrs: remaining,
        line,
    });
    Ok(())
}

fn parse_edge_chain(
    first: &str,
    rest: &[Tok],
    line: usize,
    spec: &mut ParsedSpec,
) -> Result<(), SpecError> {
    let mut names = vec![first.to_string()];
    let mut i = 0;
    while i < rest.len() {
        match &rest[i] {
            Tok::Arrow => {
                let name = match rest.get(i + 1) {
                    Some(Tok::Word(w)) => w.clone(),
                    _ => return Err(parse_err(line, "expected task name after '->'")),
                };
                validate_identifier(&name, line)?;
                names.push(name);
                i += 2;
            }
            Tok::LBracket => break,
            other => {
                return Err(parse_err(
                    line,
                    format!("expected '->' in edge chain, found {}", other.describe()),
                ))
            }
        }
    }

    let mut optional = None;
    if i < rest.len() {
        let (attrs, consumed) = parse_attr_list(&rest[i + 1..], line)?;
        if i + 1 + consumed != rest.len() {
            return Err(parse_err(line, "unexpected tokens after edge attributes"));
        }
        for (key, value) in attrs {
            match (key.as_str(), value.as_str()) {
                ("optional", "true") => optional = Some(true),
                ("optional", "false") => optional = Some(false),
                ("optional", other) => {
                    return Err(parse_err(
                        line,
                        format!("edge attribute 'optional' must be true or false, got '{}'", other),
                    ))
                }
                (key, _) => {
                    return Err(parse_err(line, format!("unknown edge attribute '{}'", key)))
                }
            }
        }
    }

    for pair in names.windows(2) {
        spec.edges.push(ParsedEdge {
            from: pair[0].clone(),
            to: pair[1].clone(),
            optional,
            line,
        });
    }
    Ok(())
}

/// Parses `key=value ...` up to and including the closing `]`. Returns the
/// attributes and the number of tokens consumed.
fn parse_attr_list(
    tokens: &[Tok],
    line: usize,
) -> Result<(Vec<(String, String)>, usize), SpecError> {
    let mut attrs = Vec::new();
    let mut i = 0;
    loop {
        match tokens.get(i) {
            Some(Tok::RBracket) => return Ok((attrs, i + 1)),
            Some(Tok::Word(key)) => {
                match tokens.get(i + 1) {
                    Some(Tok::Eq) => {}
                    _ => {
                        return Err(parse_err(
                            line,
                            format!("attribute '{}' is missing '=value'", key),
                        ))
                    }
                }
                let value = match tokens.get(i + 2) {
                    Some(Tok::Word(w)) => w.clone(),
                    Some(Tok::Quoted(q)) => q.clone(),
                    _ => {
                        return Err(parse_err(
                            line,
                            format!("attribute '{}' has no value", key),
                        ))
                    }
                };
                attrs.push((key.clone(), value));
                i += 3;
            }
            Some(other) => {
                return Err(parse_err(
                    line,
                    format!("expected attribute or ']', found {}", other.describe()),
                ))
            }
            None => return Err(parse_err(line, "unterminated attribute list")),
        }
    }
}

fn validate_identifier(name: &str, line: usize) -> Result<(), SpecError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(parse_err(line, format!("invalid task name '{}'", name)))
    }
}

/// Parses duration attributes like `500ms`, `10s`, `5m`, `2h`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{}' is missing a unit (ms, s, m, h)", trimmed))?;
    let (digits, unit) = trimmed.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", trimmed))?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(format!("unknown duration unit '{}' in '{}'", unit, trimmed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_task_declarations_and_edges() {
        let spec = parse(
            r#"
            # two sources feeding a median
            ds1 [type=http method=GET url="https://a.example.com/price"];
            ds2 [type=http method=GET url="https://b.example.com/price"];
            answer [type=median min_answers=2];

            ds1 -> answer;
            ds2 -> answer;
            "#,
        )
        .unwrap();

        assert_eq!(spec.tasks.len(), 3);
        assert_eq!(spec.tasks[0].id, "ds1");
        assert_eq!(spec.tasks[0].task_type, "http");
        assert_eq!(
            spec.tasks[0].attrs,
            vec![
                ("method".to_string(), "GET".to_string()),
                ("url".to_string(), "https://a.example.com/price".to_string()),
            ]
        );
        assert_eq!(spec.edges.len(), 2);
        assert_eq!(spec.edges[0].from, "ds1");
        assert_eq!(spec.edges[0].to, "answer");
        assert_eq!(spec.edges[0].optional, None);
    }

    #[test]
    fn edge_chains_expand_pairwise() {
        let spec = parse("a [type=median]; b [type=median]; c [type=median]; a -> b -> c;").unwrap();
        let pairs: Vec<_> = spec
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("b", "c")]);
    }

    #[test]
    fn edge_attributes_apply_to_whole_chain() {
        let spec = parse("a [type=median]; b [type=median]; a -> b [optional=true];").unwrap();
        assert_eq!(spec.edges[0].optional, Some(true));
    }

    #[test]
    fn newline_terminates_statements_outside_brackets() {
        let spec = parse(
            "ds [type=http method=GET\n    url=\"https://a.example.com\"]\nds2 [type=median]",
        )
        .unwrap();
        assert_eq!(spec.tasks.len(), 2);
        assert_eq!(spec.tasks[0].attrs.len(), 2);
    }

    #[test]
    fn unquoted_reference_values_survive() {
        let spec = parse("m [type=multiply times=$(inputs.times)];").unwrap();
        assert_eq!(
            spec.tasks[0].attrs,
            vec![("times".to_string(), "$(inputs.times)".to_string())]
        );
    }

    #[test]
    fn missing_type_is_reported_with_line() {
        let err = parse("\n\nbroken [method=GET];").unwrap_err();
        match err {
            SpecError::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("missing a 'type'"), "{}", message);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn unterminated_attribute_list_is_rejected() {
        assert!(parse("a [type=http").is_err());
    }

    #[test]
    fn quoted_values_keep_escapes_and_spaces() {
        let spec = parse(r#"a [type=http url="https://x.example.com/?q=\"eth usd\""];"#).unwrap();
        assert_eq!(spec.tasks[0].attrs[0].1, r#"https://x.example.com/?q="eth usd""#);
    }

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("fast").is_err());
    }
}
