//! Parser for the inner text of a `${{ ... }}` reference.
//!
//! Grammar: `[modifier ':']* [scope '.']* name`. Each piece is classified by the
//! separator that follows it and checked against a small state machine:
//!
//! ```text
//! START    -> MODIFIER | SCOPE | TEXT
//! MODIFIER -> MODIFIER | SCOPE | TEXT
//! SCOPE    -> SCOPE | TEXT
//! TEXT     (accepting)
//! ```

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{EngineError, Result};

/// Modifiers that can prefix a variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Modifier {
    /// Resolution fails when the variable is absent.
    Required,
}

impl Modifier {
    fn parse(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("required") {
            Some(Modifier::Required)
        } else {
            None
        }
    }
}

/// A parsed variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVariable {
    pub modifiers: BTreeSet<Modifier>,
    pub scopes: Vec<String>,
    pub name: String,
}

impl ParsedVariable {
    /// Scopes joined by `.` followed by the name, e.g. `job.step.name`,
    /// in canonical case.
    pub fn scoped_key(&self) -> String {
        if self.scopes.is_empty() {
            canonical_key(&self.name)
        } else {
            canonical_key(&format!("{}.{}", self.scopes.join("."), self.name))
        }
    }

    pub fn is_required(&self) -> bool {
        self.modifiers.contains(&Modifier::Required)
    }

    pub fn is_scoped(&self) -> bool {
        !self.scopes.is_empty()
    }
}

impl fmt::Display for ParsedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            match modifier {
                Modifier::Required => write!(f, "required:")?,
            }
        }
        write!(f, "{}", self.scoped_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Modifier,
    Scope,
    Text,
}

/// Variable names are case-insensitive; keys are stored lowercased.
pub fn canonical_key(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// Returns true if `s` is a valid identifier.
///
/// Letters, digits, `-` and `_`; must not start or end with `-`.
pub fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
}

/// Returns true if `s` is a dot-separated chain of identifiers.
pub fn is_scoped_identifier(s: &str) -> bool {
    s.split('.').all(is_identifier)
}

/// Parse the trimmed inner text of a variable reference.
pub fn parse(input: &str) -> Result<ParsedVariable> {
    let input = input.trim();
    let mut state = State::Start;
    let mut modifiers = BTreeSet::new();
    let mut scopes = Vec::new();
    let mut start = 0;

    for (position, c) in input.char_indices() {
        let next = match c {
            ':' => State::Modifier,
            '.' => State::Scope,
            _ => continue,
        };
        let piece = &input[start..position];

        if !transition_allowed(state, next) {
            return Err(syntax_error(
                "unexpected modifier after scope",
                piece,
                start,
                input,
            ));
        }

        match next {
            State::Modifier => {
                let modifier = Modifier::parse(piece)
                    .ok_or_else(|| syntax_error("invalid modifier", piece, start, input))?;
                modifiers.insert(modifier);
            }
            _ => {
                if !is_identifier(piece) {
                    return Err(syntax_error("invalid scope", piece, start, input));
                }
                scopes.push(piece.to_string());
            }
        }

        state = next;
        start = position + 1;
    }

    let name = &input[start..];
    if !is_identifier(name) {
        return Err(syntax_error("invalid variable name", name, start, input));
    }

    Ok(ParsedVariable {
        modifiers,
        scopes,
        name: name.to_string(),
    })
}

fn transition_allowed(from: State, to: State) -> bool {
    matches!(
        (from, to),
        (State::Start, _)
            | (State::Modifier, _)
            | (State::Scope, State::Scope)
            | (State::Scope, State::Text)
    )
}

fn syntax_error(what: &str, piece: &str, position: usize, input: &str) -> EngineError {
    EngineError::Syntax(format!(
        "{} [{}] at position [{}] in [{}]",
        what, piece, position, input
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let parsed = parse("foo").unwrap();
        assert!(parsed.scopes.is_empty());
        assert!(!parsed.is_required());
        assert_eq!(parsed.scoped_key(), "foo");
    }

    #[test]
    fn test_parse_scoped_name() {
        let parsed = parse("pipeline-1.job_a.step.out").unwrap();
        assert_eq!(parsed.scopes, vec!["pipeline-1", "job_a", "step"]);
        assert_eq!(parsed.name, "out");
        assert_eq!(parsed.scoped_key(), "pipeline-1.job_a.step.out");
        assert!(parsed.is_scoped());
    }

    #[test]
    fn test_parse_required_modifier() {
        let parsed = parse(" required:step.value ").unwrap();
        assert!(parsed.is_required());
        assert_eq!(parsed.scoped_key(), "step.value");
        assert_eq!(parsed.to_string(), "required:step.value");
    }

    #[test]
    fn test_modifier_keyword_is_case_insensitive() {
        assert!(parse("REQUIRED:x").unwrap().is_required());
    }

    #[test]
    fn test_repeated_modifier_is_accepted() {
        let parsed = parse("required:required:x").unwrap();
        assert_eq!(parsed.modifiers.len(), 1);
    }

    #[test]
    fn test_invalid_modifier() {
        let err = parse("optional:x").unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
        assert!(err.to_string().contains("invalid modifier [optional]"));
    }

    #[test]
    fn test_modifier_after_scope_rejected() {
        assert!(matches!(
            parse("a.required:x"),
            Err(EngineError::Syntax(_))
        ));
    }

    #[test]
    fn test_non_terminal_final_state_rejected() {
        assert!(parse("a.").is_err());
        assert!(parse("required:").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_name_is_case_insensitive() {
        assert_eq!(parse("FOO").unwrap().scoped_key(), "foo");
        assert_eq!(parse("Job.Step.Out").unwrap().scoped_key(), "job.step.out");
        assert_eq!(parse("required:X").unwrap().to_string(), "required:x");
    }

    #[test]
    fn test_leading_digit_is_allowed() {
        let parsed = parse("1st.2nd").unwrap();
        assert_eq!(parsed.scopes, vec!["1st"]);
        assert_eq!(parsed.name, "2nd");
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        assert!(parse("-abc").is_err());
        assert!(parse("a.-b").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("abc-").is_err());
        assert!(parse("a..b").is_err());
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("a"));
        assert!(is_identifier("_a-b_c1"));
        assert!(is_identifier("9lives"));
        assert!(!is_identifier("-a"));
        assert!(!is_identifier("a-"));
        assert!(!is_identifier(""));
        assert!(is_scoped_identifier("a.b.c"));
        assert!(!is_scoped_identifier("a..c"));
    }
}
