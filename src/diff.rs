//! Unified diffs of expected against actual output

use similar::TextDiff;

const CONTEXT: usize = 3;

/// Unified diff from `expected` to `actual`, empty when they are equal.
pub fn unified<A: AsRef<str>, B: AsRef<str>>(expected: &[A], actual: &[B]) -> String {
    let expected = join(expected);
    let actual = join(actual);
    if expected == actual {
        return String::new();
    }
    TextDiff::from_lines(&expected, &actual)
        .unified_diff()
        .context_radius(CONTEXT)
        .header("Expected", "Output")
        .to_string()
}

fn join<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_is_empty() {
        assert_eq!(unified(&["a", "b"], &["a", "b"]), "");
        assert_eq!(unified::<&str, &str>(&[], &[]), "");
    }

    #[test]
    fn test_changed_line() {
        let diff = unified(&["one", "two", "three"], &["one", "2", "three"]);
        let lines: Vec<_> = diff.lines().collect();
        assert_eq!(lines[0], "--- Expected");
        assert_eq!(lines[1], "+++ Output");
        assert!(lines[2].starts_with("@@"));
        assert!(lines.contains(&"-two"));
        assert!(lines.contains(&"+2"));
        assert!(lines.contains(&" one"));
    }

    #[test]
    fn test_context_is_limited() {
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let mut actual = expected.clone();
        actual[10] = "ten".into();
        let diff = unified(&expected, &actual);
        assert!(diff.contains(" 7\n"));
        assert!(!diff.contains(" 6\n"));
        assert!(diff.contains(" 13\n"));
        assert!(!diff.contains(" 14\n"));
    }
}
