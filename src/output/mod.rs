// Output formatting — terminal display helpers.

pub mod terminal;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Unlike byte slicing (`&text[..120]`), this respects UTF-8 character boundaries
/// and will never panic on multi-byte characters like emoji or accented letters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_pass_through() {
        assert_eq!(truncate_chars("move", 10), "move");
    }

    #[test]
    fn long_strings_are_truncated_with_ellipsis() {
        assert_eq!(truncate_chars("abcdefgh", 4), "abcd...");
    }

    #[test]
    fn multibyte_boundaries_are_respected() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }
}
