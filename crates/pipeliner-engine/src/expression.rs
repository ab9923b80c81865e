//! Boolean expression evaluator for `if:` conditionals.
//!
//! Expressions are evaluated after variable resolution, so they only contain
//! literals: `true`, `false`, numbers, and quoted strings. Supported operators,
//! loosest binding first:
//!
//! | operators | notes |
//! |-----------|-------|
//! | `\|\|` `or` | booleans only |
//! | `&&` `and` | booleans only |
//! | `==` `!=` `eq` `ne` | any values of the same type |
//! | `<` `<=` `>` `>=` `lt` `le` `gt` `ge` | numbers or strings |
//! | `+` `-` | numbers only; string concatenation is rejected |
//! | `*` `/` `%` | numbers only |
//! | `!` `not` `-` (unary) | |
//!
//! Anything that does not evaluate to a boolean is a syntax error.

use crate::error::{EngineError, Result};

/// Evaluate `expression` to a boolean.
pub fn evaluate(expression: &str) -> Result<bool> {
    let invalid = || EngineError::Syntax(format!("Invalid expression [{}]", expression));
    let tokens = tokenize(expression).map_err(|_| invalid())?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.parse_or().map_err(|_| invalid())?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid());
    }
    match value {
        Value::Bool(b) => Ok(b),
        _ => Err(invalid()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Bool(bool),
    Number(f64),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
}

type Eval<T> = std::result::Result<T, String>;

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

const SYMBOLS: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn tokenize(input: &str) -> Eval<Vec<Tok>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Tok::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Tok::RParen);
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string".into()),
                    Some('\\') if chars.get(i + 1).is_some() => {
                        value.push(chars[i + 1]);
                        i += 2;
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        value.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Tok::Str(value));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text.parse::<f64>().map_err(|e| e.to_string())?;
            tokens.push(Tok::Number(number));
            continue;
        }
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let tok = match word.as_str() {
                "true" => Tok::Bool(true),
                "false" => Tok::Bool(false),
                "and" => Tok::Op("&&"),
                "or" => Tok::Op("||"),
                "not" => Tok::Op("!"),
                "eq" => Tok::Op("=="),
                "ne" => Tok::Op("!="),
                "lt" => Tok::Op("<"),
                "le" => Tok::Op("<="),
                "gt" => Tok::Op(">"),
                "ge" => Tok::Op(">="),
                _ => return Err(format!("unknown identifier [{}]", word)),
            };
            tokens.push(tok);
            continue;
        }

        let rest: String = chars[i..].iter().take(2).collect();
        let symbol = SYMBOLS
            .iter()
            .find(|s| rest.starts_with(**s))
            .ok_or_else(|| format!("unexpected character [{}]", c))?;
        tokens.push(Tok::Op(*symbol));
        i += symbol.len();
    }

    Ok(tokens)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser / evaluator
// ─────────────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        let op = self.peek_op().filter(|op| ops.contains(op))?;
        self.pos += 1;
        Some(op)
    }

    fn parse_or(&mut self) -> Eval<Value> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = Value::Bool(as_bool(&left)? || as_bool(&right)?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Eval<Value> {
        let mut left = self.parse_equality()?;
        while self.eat_op(&["&&"]).is_some() {
            let right = self.parse_equality()?;
            left = Value::Bool(as_bool(&left)? && as_bool(&right)?);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Eval<Value> {
        let mut left = self.parse_relational()?;
        while let Some(op) = self.eat_op(&["==", "!="]) {
            let right = self.parse_relational()?;
            let equal = left == right;
            left = Value::Bool(if op == "==" { equal } else { !equal });
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Eval<Value> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.eat_op(&["<", "<=", ">", ">="]) {
            let right = self.parse_additive()?;
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => {
                    a.partial_cmp(b).ok_or("incomparable numbers")?
                }
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => return Err(format!("cannot compare with [{}]", op)),
            };
            let result = match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            left = Value::Bool(result);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Eval<Value> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = self.parse_multiplicative()?;
            if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                return Err("string concatenation is not allowed".into());
            }
            let (a, b) = (as_number(&left)?, as_number(&right)?);
            left = Value::Number(if op == "+" { a + b } else { a - b });
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Eval<Value> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let right = self.parse_unary()?;
            let (a, b) = (as_number(&left)?, as_number(&right)?);
            left = Value::Number(match op {
                "*" => a * b,
                "/" if b != 0.0 => a / b,
                "%" if b != 0.0 => a % b,
                _ => return Err("division by zero".into()),
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Eval<Value> {
        if self.eat_op(&["!"]).is_some() {
            let value = self.parse_unary()?;
            return Ok(Value::Bool(!as_bool(&value)?));
        }
        if self.eat_op(&["-"]).is_some() {
            let value = self.parse_unary()?;
            return Ok(Value::Number(-as_number(&value)?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Eval<Value> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or("unexpected end of expression")?;
        self.pos += 1;
        match tok {
            Tok::Bool(b) => Ok(Value::Bool(b)),
            Tok::Number(n) => Ok(Value::Number(n)),
            Tok::Str(s) => Ok(Value::Str(s)),
            Tok::LParen => {
                let value = self.parse_or()?;
                match self.tokens.get(self.pos) {
                    Some(Tok::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("missing closing parenthesis".into()),
                }
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

fn as_bool(value: &Value) -> Eval<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(format!("expected boolean, found {:?}", other)),
    }
}

fn as_number(value: &Value) -> Eval<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(format!("expected number, found {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert!(evaluate("true").unwrap());
        assert!(!evaluate("false").unwrap());
        assert!(evaluate(" ( true ) ").unwrap());
    }

    #[test]
    fn test_string_equality() {
        assert!(evaluate("'main' == 'main'").unwrap());
        assert!(evaluate("\"a\" != 'b'").unwrap());
        assert!(evaluate("'x' eq 'x'").unwrap());
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(evaluate("10 > 9").unwrap());
        assert!(evaluate("1.5 <= 1.5").unwrap());
        assert!(evaluate("2 * 3 == 6").unwrap());
        assert!(evaluate("7 % 4 == 3").unwrap());
        assert!(evaluate("-1 lt 0").unwrap());
    }

    #[test]
    fn test_logical_operators() {
        assert!(evaluate("true && !false").unwrap());
        assert!(evaluate("false || 1 == 1").unwrap());
        assert!(evaluate("not false and true").unwrap());
        assert!(!evaluate("(true || false) && false").unwrap());
    }

    #[test]
    fn test_mixed_types_are_not_equal() {
        assert!(!evaluate("'1' == 1").unwrap());
    }

    #[test]
    fn test_non_boolean_result_is_error() {
        let err = evaluate("1 + 2").unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
        assert_eq!(err.to_string(), "Invalid expression [1 + 2]");
    }

    #[test]
    fn test_string_concatenation_rejected() {
        assert!(evaluate("'a' + 'b' == 'ab'").is_err());
    }

    #[test]
    fn test_unknown_identifier_rejected() {
        assert!(evaluate("branch == 'main'").is_err());
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(evaluate("").is_err());
        assert!(evaluate("(true").is_err());
        assert!(evaluate("true true").is_err());
        assert!(evaluate("'open").is_err());
        assert!(evaluate("1 / 0 == 1").is_err());
        assert!(evaluate("true && 1").is_err());
    }
}
