//! Tweet text cleaning
//!
//! Normalizes raw tweet text before contraction lookup:
//! - Hyperlinks, @mentions, emoji and emoticons removed
//! - Whitespace collapsed and trimmed
//! - (strict mode) compound hyphens split and punctuation deleted
//!
//! Order matters: contraction lookup is token-based, so punctuation and
//! compound hyphenation must be normalized before tokenization or table keys
//! will not match.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").unwrap());
// Eyes, optional nose, mouth: ":-)", ";D", "=p", "8)", "x/" ...
static EMOTICON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[:;=8xX]['\-]?[)DpP/\\oO0*]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// Hyphen acting as a compound joiner: "new-age" -> "new age"
static COMPOUND_HYPHEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-zA-Z])-([a-zA-Z])").unwrap());
// Fixed punctuation/symbol exclusion set (strict mode only)
static PUNCTUATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[_`"\-;%()|+&=*%.,!?:#$@\[\]/]"#).unwrap());

/// Cleaning policy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanMode {
    /// Canonical variant: also splits compound hyphens and deletes the
    /// punctuation exclusion set so contraction keys match cleanly.
    #[default]
    Strict,
    /// Loose variant kept for compatibility: stops after whitespace collapse.
    Legacy,
}

/// Stateless tweet cleaner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCleaner {
    mode: CleanMode,
}

impl TextCleaner {
    /// Create a cleaner with the given policy variant.
    pub fn new(mode: CleanMode) -> Self {
        Self { mode }
    }

    /// The active policy variant.
    pub fn mode(&self) -> CleanMode {
        self.mode
    }

    /// Clean raw tweet text. Pure, total: always returns a string, possibly
    /// empty.
    pub fn clean(&self, text: &str) -> String {
        let text = URL_RE.replace_all(text, "");
        let text = MENTION_RE.replace_all(&text, "");
        let text = strip_emoji(&text);
        let text = EMOTICON_RE.replace_all(&text, "");
        let text = WHITESPACE_RE.replace_all(&text, " ");
        let text = text.trim();

        if self.mode == CleanMode::Legacy {
            return text.to_string();
        }

        let text = COMPOUND_HYPHEN_RE.replace_all(text, "$1 $2");
        let text = PUNCTUATION_RE.replace_all(&text, "");
        // Deleting punctuation can leave double spaces behind ("a , b");
        // re-collapse so cleaning stays idempotent.
        let text = WHITESPACE_RE.replace_all(&text, " ");
        text.trim().to_string()
    }
}

/// Drop emoji code points along with the invisible joiners that glue emoji
/// sequences together.
fn strip_emoji(text: &str) -> String {
    let mut buf = [0u8; 4];
    text.chars()
        .filter(|&c| {
            if c == '\u{200D}' || c == '\u{FE0F}' {
                return false;
            }
            emojis::get(c.encode_utf8(&mut buf)).is_none()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_urls_and_mentions() {
        let cleaner = TextCleaner::default();
        assert_eq!(
            cleaner.clean("hey @user check https://example.com/x?y=1 now"),
            "hey check now"
        );
    }

    #[test]
    fn test_strips_emoji_and_emoticons() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.clean("great :-) really 😂 great"), "great really great");
        assert_eq!(cleaner.clean("ok ;D fine"), "ok fine");
    }

    #[test]
    fn test_collapses_whitespace() {
        let cleaner = TextCleaner::new(CleanMode::Legacy);
        assert_eq!(cleaner.clean("  a \t b \n c  "), "a b c");
    }

    #[test]
    fn test_strict_splits_compound_hyphens() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.clean("new-age thinking"), "new age thinking");
    }

    #[test]
    fn test_strict_deletes_punctuation_but_keeps_apostrophes() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.clean("can't believe it!!"), "can't believe it");
        assert_eq!(cleaner.clean("what, a. scam?"), "what a scam");
    }

    #[test]
    fn test_legacy_keeps_punctuation() {
        let cleaner = TextCleaner::new(CleanMode::Legacy);
        assert_eq!(cleaner.clean("what a scam!"), "what a scam!");
    }

    #[test]
    fn test_idempotent() {
        for mode in [CleanMode::Strict, CleanMode::Legacy] {
            let cleaner = TextCleaner::new(mode);
            for input in [
                "lol that was hilarious! https://google.com/",
                "a - b @x 😂 :-) c-d",
                "",
                "   ",
            ] {
                let once = cleaner.clean(input);
                assert_eq!(cleaner.clean(&once), once, "mode {:?} input {:?}", mode, input);
            }
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(TextCleaner::default().clean(""), "");
    }
}
