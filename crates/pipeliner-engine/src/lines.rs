//! Splits a step's `run` body into logical command lines.

/// Marks a physical line as continuing onto the next.
const CONTINUATION: &str = " \\";

/// Split `input` on CR, LF, or CRLF and merge continuation lines.
///
/// A line ending in ` \` is joined with the following line. The space and
/// backslash are dropped and nothing is inserted, so `ls \` followed by
/// ` -l` becomes `ls -l`. Blank lines and `#` comments are dropped, including
/// comment lines inside a continuation.
pub fn logical_lines(input: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for line in physical_lines(input) {
        if let Some(stripped) = line.strip_suffix(CONTINUATION) {
            let trimmed = stripped.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                current.push_str(stripped);
            }
        } else {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }

    let rest = current.trim_end();
    if !rest.is_empty() && !rest.trim_start().starts_with('#') {
        lines.push(rest.to_string());
    }

    lines
}

fn physical_lines(input: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = input.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(&input[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            b'\n' => {
                lines.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < bytes.len() {
        lines.push(&input[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_and_multiple_lines() {
        assert_eq!(logical_lines("echo a"), vec!["echo a"]);
        assert_eq!(logical_lines("echo a\necho b\n"), vec!["echo a", "echo b"]);
    }

    #[test]
    fn test_line_endings() {
        assert_eq!(
            logical_lines("a\r\nb\rc\nd"),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_drops_blank_and_comment_lines() {
        assert_eq!(
            logical_lines("\n  \n# note\n  # indented\necho ok\n"),
            vec!["echo ok"]
        );
    }

    #[test]
    fn test_continuation_merges_lines() {
        assert_eq!(
            logical_lines("echo one \\\n two \\\n three\necho four"),
            vec!["echo one two three", "echo four"]
        );
    }

    #[test]
    fn test_continuation_inserts_no_space() {
        assert_eq!(
            logical_lines("ls \\\n -l\n | sort\n|wc \\\n-l"),
            vec!["ls -l", " | sort", "|wc-l"]
        );
    }

    #[test]
    fn test_surrounding_whitespace_is_kept() {
        assert_eq!(
            logical_lines("\tls \\\n -l\t\n"),
            vec!["\tls -l\t"]
        );
    }

    #[test]
    fn test_comment_inside_continuation_is_skipped() {
        assert_eq!(
            logical_lines("echo a \\\n# skipped \\\n b"),
            vec!["echo a b"]
        );
    }

    #[test]
    fn test_trailing_continuation_is_flushed() {
        assert_eq!(logical_lines("echo a \\"), vec!["echo a"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(logical_lines("").is_empty());
    }
}
