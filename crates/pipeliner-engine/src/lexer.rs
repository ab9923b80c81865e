//! Interpolation lexer.
//!
//! Splits a raw string into three token kinds:
//!
//! - `TEXT`: literal text, including escaped `\$` sequences
//! - `VARIABLE`: `${{ name }}` pipeline variable references
//! - `ENVIRONMENT_VARIABLE`: `$NAME` or `${NAME}` references
//!
//! An unclosed `${{` or `${` never fails: the remainder of the input becomes
//! text. Adjacent text runs are merged into one token.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

/// Default capacity of the token cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Variable,
    EnvironmentVariable,
}

/// A lexed token with its raw text and byte offset in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    /// The referenced name, without delimiters.
    ///
    /// `${{ foo }}` → `foo`, `${HOME}` → `HOME`, `$HOME` → `HOME`.
    /// Text tokens return their text unchanged.
    pub fn value(&self) -> &str {
        match self.kind {
            TokenKind::Text => &self.text,
            TokenKind::Variable => self.text[3..self.text.len() - 2].trim(),
            TokenKind::EnvironmentVariable => {
                if self.text.starts_with("${") {
                    &self.text[2..self.text.len() - 1]
                } else {
                    &self.text[1..]
                }
            }
        }
    }
}

/// Returns true for a valid environment variable name.
pub fn is_environment_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Tokenize an input string.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let bytes = input.as_bytes();
    let mut text_start: Option<usize> = None;
    let mut i = 0;

    // Flush the pending text run ending at `end`.
    fn flush(tokens: &mut Vec<Token>, input: &str, start: &mut Option<usize>, end: usize) {
        if let Some(s) = start.take()
            && s < end
        {
            tokens.push(Token::new(TokenKind::Text, &input[s..end], s));
        }
    }

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'$') => {
                // Escaped dollar stays literal text
                text_start.get_or_insert(i);
                i += 2;
            }
            b'$' if bytes.get(i + 1) == Some(&b'{') && bytes.get(i + 2) == Some(&b'{') => {
                match input[i + 3..].find("}}") {
                    Some(offset) => {
                        let end = i + 3 + offset + 2;
                        let inner = &input[i + 3..i + 3 + offset];
                        if inner.trim().is_empty() {
                            text_start.get_or_insert(i);
                        } else {
                            flush(&mut tokens, input, &mut text_start, i);
                            tokens.push(Token::new(TokenKind::Variable, &input[i..end], i));
                        }
                        i = end;
                    }
                    None => {
                        text_start.get_or_insert(i);
                        i = bytes.len();
                    }
                }
            }
            b'$' if bytes.get(i + 1) == Some(&b'{') => match input[i + 2..].find('}') {
                Some(offset) => {
                    let end = i + 2 + offset + 1;
                    let name = &input[i + 2..i + 2 + offset];
                    if is_environment_variable_name(name) {
                        flush(&mut tokens, input, &mut text_start, i);
                        tokens.push(Token::new(
                            TokenKind::EnvironmentVariable,
                            &input[i..end],
                            i,
                        ));
                    } else {
                        text_start.get_or_insert(i);
                    }
                    i = end;
                }
                None => {
                    text_start.get_or_insert(i);
                    i = bytes.len();
                }
            },
            b'$' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') =>
            {
                let mut end = i + 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                flush(&mut tokens, input, &mut text_start, i);
                tokens.push(Token::new(
                    TokenKind::EnvironmentVariable,
                    &input[i..end],
                    i,
                ));
                i = end;
            }
            _ => {
                text_start.get_or_insert(i);
                // Advance a whole UTF-8 character
                i += input[i..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    flush(&mut tokens, input, &mut text_start, bytes.len());
    tokens
}

/// Bounded LRU cache of tokenized strings keyed by the exact input.
///
/// Tokenizing is pure, so cached results are always valid.
pub struct TokenCache {
    entries: Mutex<LruCache<String, Arc<Vec<Token>>>>,
}

impl TokenCache {
    /// Create a cache holding at most `capacity` inputs (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Tokenize `input`, reusing a cached result when present.
    pub fn tokenize(&self, input: &str) -> Arc<Vec<Token>> {
        let mut entries = self.entries.lock();
        if let Some(tokens) = entries.get(input) {
            trace!(input, "token cache hit");
            return Arc::clone(tokens);
        }
        let tokens = Arc::new(tokenize(input));
        entries.put(input.to_string(), Arc::clone(&tokens));
        tokens
    }

    /// Number of cached inputs.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_plain_text() {
        let tokens = tokenize("echo hello");
        assert_eq!(tokens, vec![Token::new(TokenKind::Text, "echo hello", 0)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_variable() {
        let tokens = tokenize("echo ${{ foo }}!");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Text, TokenKind::Variable, TokenKind::Text]
        );
        assert_eq!(tokens[1].text, "${{ foo }}");
        assert_eq!(tokens[1].value(), "foo");
        assert_eq!(tokens[1].position, 5);
        assert_eq!(tokens[2].text, "!");
    }

    #[test]
    fn test_environment_variables() {
        let tokens = tokenize("$HOME/${USER}_x");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::EnvironmentVariable,
                TokenKind::Text,
                TokenKind::EnvironmentVariable,
                TokenKind::Text
            ]
        );
        assert_eq!(tokens[0].value(), "HOME");
        assert_eq!(tokens[2].value(), "USER");
    }

    #[test]
    fn test_bare_env_name_stops_at_non_word() {
        let tokens = tokenize("$FOO-bar");
        assert_eq!(tokens[0].text, "$FOO");
        assert_eq!(tokens[1].text, "-bar");
    }

    #[test]
    fn test_escaped_variable_is_text() {
        let input = "echo \\${{foo}}";
        let tokens = tokenize(input);
        assert_eq!(tokens, vec![Token::new(TokenKind::Text, input, 0)]);
    }

    #[test]
    fn test_escaped_env_is_text() {
        let tokens = tokenize("\\$HOME");
        assert_eq!(kinds(&tokens), vec![TokenKind::Text]);
    }

    #[test]
    fn test_unclosed_variable_becomes_text() {
        let tokens = tokenize("a ${{ foo");
        assert_eq!(tokens, vec![Token::new(TokenKind::Text, "a ${{ foo", 0)]);

        let tokens = tokenize("a ${HOME");
        assert_eq!(tokens, vec![Token::new(TokenKind::Text, "a ${HOME", 0)]);
    }

    #[test]
    fn test_empty_variable_is_text() {
        let tokens = tokenize("${{  }}");
        assert_eq!(kinds(&tokens), vec![TokenKind::Text]);
    }

    #[test]
    fn test_lone_dollar_and_positional_are_text() {
        let tokens = tokenize("cost $5 and $");
        assert_eq!(kinds(&tokens), vec![TokenKind::Text]);
    }

    #[test]
    fn test_multibyte_text() {
        let tokens = tokenize("héllo ${{ x }} wörld");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Text, TokenKind::Variable, TokenKind::Text]
        );
        assert_eq!(tokens[2].text, " wörld");
    }

    #[test]
    fn test_is_environment_variable_name() {
        assert!(is_environment_variable_name("HOME"));
        assert!(is_environment_variable_name("_X1"));
        assert!(!is_environment_variable_name("1X"));
        assert!(!is_environment_variable_name(""));
        assert!(!is_environment_variable_name("A-B"));
    }

    #[test]
    fn test_token_cache_reuses_entries() {
        let cache = TokenCache::new(2);
        let first = cache.tokenize("${{ a }}");
        let second = cache.tokenize("${{ a }}");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_token_cache_evicts_least_recently_used() {
        let cache = TokenCache::new(2);
        let a = cache.tokenize("a");
        cache.tokenize("b");
        cache.tokenize("a");
        cache.tokenize("c");
        assert_eq!(cache.len(), 2);
        // "a" was used more recently than "b", so it survives
        assert!(Arc::ptr_eq(&a, &cache.tokenize("a")));
    }
}
