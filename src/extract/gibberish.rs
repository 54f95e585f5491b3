//! Detects text that is unusable because it came from a broken PDF font
//! encoding rather than because the page is genuinely short or blank.

use unicode_general_category::{GeneralCategory, get_general_category};

/// Characters excluded from the control/unassigned/private-use/surrogate
/// count even though some of them technically fall in `Cc`.
fn is_excluded_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

fn is_bad_category(c: char) -> bool {
    if is_excluded_whitespace(c) {
        return false;
    }
    matches!(
        get_general_category(c),
        GeneralCategory::Control
            | GeneralCategory::Unassigned
            | GeneralCategory::PrivateUse
            | GeneralCategory::Surrogate
    )
}

/// Three-rule check over extracted page text:
///
/// 1. Trimmed length under 20 code points → not gibberish (too little
///    signal either way).
/// 2. More than 5% U+FFFD replacement characters → gibberish.
/// 3. More than 10% code points in categories Cc/Cn/Co/Cs (excluding
///    space/tab/lf/cr) → gibberish.
pub fn is_gibberish(text: &str) -> bool {
    is_gibberish_with_thresholds(text, 20, 0.05, 0.10)
}

/// Same as [`is_gibberish`] but with configurable thresholds, for callers
/// wired to `GIBBERISH_*` environment overrides.
pub fn is_gibberish_with_thresholds(
    text: &str,
    min_length: usize,
    replacement_char_ratio: f64,
    control_char_ratio: f64,
) -> bool {
    let trimmed_len = text.trim().chars().count();
    if trimmed_len < min_length {
        return false;
    }

    let n = text.chars().count() as f64;
    let replacement_count = text.chars().filter(|&c| c == '\u{FFFD}').count() as f64;
    if replacement_count / n > replacement_char_ratio {
        return true;
    }

    let bad_count = text.chars().filter(|&c| is_bad_category(c)).count() as f64;
    bad_count / n > control_char_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_not_gibberish() {
        assert!(!is_gibberish(""));
    }

    #[test]
    fn short_whitespace_is_not_gibberish() {
        assert!(!is_gibberish("   abc"));
    }

    #[test]
    fn normal_prose_is_not_gibberish() {
        let text = "The quick brown fox jumps over the lazy dog and keeps running.";
        assert!(!is_gibberish(text));
    }

    #[test]
    fn high_replacement_char_ratio_is_gibberish() {
        let text = "\u{FFFD}".repeat(30);
        assert!(is_gibberish(&text));
    }

    #[test]
    fn high_private_use_ratio_is_gibberish() {
        let text = "\u{E010}".repeat(30);
        assert!(is_gibberish(&text));
    }

    #[test]
    fn low_private_use_ratio_is_not_gibberish() {
        let mut text = "a".repeat(190);
        text.push_str(&"\u{E010}".repeat(10));
        assert!(!is_gibberish(&text));
    }

    #[test]
    fn control_chars_used_as_whitespace_are_excluded() {
        let text = format!("{}\n\t\r ", "word ".repeat(10));
        assert!(!is_gibberish(&text));
    }

    #[test]
    fn is_deterministic() {
        let text = "\u{E010}".repeat(40);
        assert_eq!(is_gibberish(&text), is_gibberish(&text));
    }
}
