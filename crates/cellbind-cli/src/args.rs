//! Command-line argument syntax for host values.
//!
//! | Syntax              | Value                     |
//! |---------------------|---------------------------|
//! | `#missing`          | omitted argument          |
//! | `#empty`, `""`      | empty cell                |
//! | `TRUE`, `false`     | boolean                   |
//! | `#N/A`, `#VALUE!`   | error code                |
//! | `42`, `-1.5e3`      | number                    |
//! | `2014-03-10T17:40`  | date and time             |
//! | `"quoted text"`     | text, verbatim            |
//! | `[a,b;c,d]`         | block, rows split by `;`  |
//!
//! Anything else is text.

use rhi_cellbind_core::{Block, ContextKey, ErrorCode, Value, parse_datetime};

/// Parse one argument.
pub fn parse_value(arg: &str) -> Value {
    let trimmed = arg.trim();
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']'))
        && let Some(block) = parse_block(inner)
    {
        return Value::Block(block);
    }
    parse_scalar(trimmed)
}

fn parse_scalar(arg: &str) -> Value {
    if arg.is_empty() {
        return Value::Empty;
    }
    if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
        let inner = &arg[1..arg.len() - 1];
        return if inner.is_empty() {
            Value::Empty
        } else {
            Value::text(inner)
        };
    }
    match arg.to_ascii_lowercase().as_str() {
        "#missing" => return Value::Missing,
        "#empty" => return Value::Empty,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Some(code) = ErrorCode::parse(arg) {
        return Value::error(code, code.as_str());
    }
    if let Ok(n) = arg.parse::<f64>()
        && n.is_finite()
    {
        return Value::Number(n);
    }
    if let Some(dt) = parse_datetime(arg) {
        return Value::DateTime(dt);
    }
    Value::text(arg)
}

fn parse_block(inner: &str) -> Option<Block> {
    let rows = inner
        .split(';')
        .map(|row| row.split(',').map(parse_scalar).collect())
        .collect();
    Block::from_rows(rows)
}

/// Parse a caller address: `R2C3` names a cell, anything else a named caller.
pub fn parse_caller(text: &str) -> ContextKey {
    let upper = text.trim().to_ascii_uppercase();
    let cell = upper.strip_prefix('R').and_then(|rest| {
        let (row, column) = rest.split_once('C')?;
        Some(ContextKey::Cell {
            row: row.parse().ok()?,
            column: column.parse().ok()?,
        })
    });
    cell.unwrap_or_else(|| ContextKey::Named(text.trim().to_string()))
}

/// Split a script line into arguments, keeping double-quoted runs intact.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                started = true;
                current.push(c);
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scalars() {
        assert_eq!(parse_value("42"), Value::Number(42.0));
        assert_eq!(parse_value("TRUE"), Value::Bool(true));
        assert_eq!(parse_value("#missing"), Value::Missing);
        assert_eq!(parse_value(""), Value::Empty);
        assert_eq!(parse_value("hello"), Value::text("hello"));
        assert_eq!(parse_value("\"42\""), Value::text("42"));
    }

    #[test]
    fn test_error_codes() {
        match parse_value("#N/A") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::NotAvailable),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_datetime() {
        let expected = NaiveDate::from_ymd_opt(2014, 3, 10)
            .unwrap()
            .and_hms_opt(17, 40, 21)
            .unwrap();
        assert_eq!(
            parse_value("2014-03-10T17:40:21"),
            Value::DateTime(expected)
        );
    }

    #[test]
    fn test_block() {
        let Value::Block(block) = parse_value("[I,S;1,x]") else {
            panic!("expected block");
        };
        assert_eq!(block.rows(), 2);
        assert_eq!(block.columns(), 2);
        assert_eq!(block.get(0, 0), Some(&Value::text("I")));
        assert_eq!(block.get(1, 0), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_ragged_block_is_text() {
        assert_eq!(parse_value("[1,2;3]"), Value::text("[1,2;3]"));
    }

    #[test]
    fn test_parse_caller() {
        assert_eq!(parse_caller("R2C3"), ContextKey::Cell { row: 2, column: 3 });
        assert_eq!(parse_caller("r10c1"), ContextKey::Cell { row: 10, column: 1 });
        assert_eq!(parse_caller("Sheet1"), ContextKey::Named("Sheet1".into()));
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(
            tokenize(r#"Echo  "two words" 3"#),
            vec!["Echo", "\"two words\"", "3"]
        );
        assert_eq!(tokenize("  "), Vec::<String>::new());
        assert_eq!(tokenize(r#"F """#), vec!["F", "\"\""]);
    }
}
