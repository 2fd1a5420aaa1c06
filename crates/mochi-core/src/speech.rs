//! Text preparation for speech synthesis.
//!
//! Replies are written for a chat bubble and read badly when synthesized
//! verbatim: markdown markers get spelled out, emoji become silence or odd
//! noises, and *stage directions* should never be voiced. Pure functions,
//! no I/O.

use regex::Regex;
use std::sync::LazyLock;

// Compiled regexes — allocated once, reused across calls.
static RE_FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static RE_INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]+`").unwrap());
static RE_BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static RE_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
// Single-asterisk spans are stage directions (*wags tail*), not italics —
// drop them entirely rather than unwrap them.
static RE_ACTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*[^*\n]+\*").unwrap());
static RE_EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{1F000}-\u{1FAFF}\u{2600}-\u{27BF}\u{2190}-\u{21FF}\u{2B00}-\u{2BFF}\u{FE0F}]")
        .unwrap()
});
static RE_MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

/// Strip everything that should not be voiced. The visible bubble keeps the
/// original text; only the synthesis input goes through here.
pub fn clean_text_for_speech(text: &str) -> String {
    let mut c = text.to_string();

    c = RE_FENCED_CODE.replace_all(&c, " ").into_owned();
    c = RE_INLINE_CODE.replace_all(&c, " ").into_owned();
    c = RE_BOLD.replace_all(&c, "$1").into_owned();
    c = RE_LINK.replace_all(&c, "$1").into_owned();
    c = RE_ACTION.replace_all(&c, " ").into_owned();
    c = RE_EMOJI.replace_all(&c, "").into_owned();
    c = RE_MULTI_SPACE.replace_all(&c, " ").into_owned();

    c.trim().to_string()
}
