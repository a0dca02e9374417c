/*!
 * Pure text predicates over cue payloads.
 *
 * These functions decide which lines are worth sending to a provider and
 * detect hallucinated vector-drawing output coming back from an LLM.
 */

use once_cell::sync::Lazy;
use regex::Regex;

/// ASS inline override tags: `{\i1}`, `{\pos(1,2)}`, ...
static OVERRIDE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// HTML-ish inline tags: `<i>`, `</font>`, ...
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").unwrap());

/// Bracketed sound-effect annotations: `[door slams]`
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());

/// Parenthesized sound-effect annotations: `(sighs)`
static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()]*\)").unwrap());

/// Captioning/sync credit lines
static CREDITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(captioning by|captions by|captioned by|synced by|sync by|subtitles by|corrected by)[^\n]*").unwrap()
});

/// URLs
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(https?://|www\.)\S+").unwrap());

/// Collapse runs of spaces/tabs left behind by the removals
static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Music note symbols commonly wrapping sung lines
const MUSIC_SYMBOLS: &[char] = &['♪', '♫', '♬', '♩', '♭', '♯'];

/// ASS drawing opcodes
const DRAWING_OPCODES: &[char] = &['m', 'n', 'l', 'b', 's', 'p', 'c'];

/// Remove a pattern repeatedly until a fixpoint, so nested annotations like
/// `[[x]]` cannot survive one pass and the function stays idempotent
fn remove_to_fixpoint(regex: &Regex, text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = regex.replace_all(&current, "").to_string();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Strip markup and non-dialogue noise from a cue payload.
///
/// Removes override tags, HTML-like tags, logical line-break markers
/// (`\N`, `\n`, `\t`), music symbols, bracketed/parenthesized sound
/// annotations, credit lines and URLs. Literal unmatched braces are
/// preserved. Idempotent: applying it twice equals applying it once.
pub fn remove_markup(text: &str) -> String {
    let mut result = remove_to_fixpoint(&OVERRIDE_TAG, text);
    result = remove_to_fixpoint(&HTML_TAG, &result);

    // Literal escape sequences as they appear inside subtitle text
    result = result
        .replace("\\N", " ")
        .replace("\\n", " ")
        .replace("\\t", " ");

    result = result.replace(MUSIC_SYMBOLS, "");
    result = remove_to_fixpoint(&BRACKETED, &result);
    result = remove_to_fixpoint(&PARENTHESIZED, &result);
    result = CREDITS.replace_all(&result, "").to_string();
    result = URL.replace_all(&result, "").to_string();

    let collapsed = SPACE_RUN.replace_all(&result, " ");
    collapsed.trim().to_string()
}

/// Strip only inline style tags (override and HTML-like), leaving sound
/// annotations and line structure alone. Used on translated output when the
/// operator wants plain text.
pub fn strip_inline_tags(text: &str) -> String {
    let result = remove_to_fixpoint(&OVERRIDE_TAG, text);
    remove_to_fixpoint(&HTML_TAG, &result)
}

/// Remove consecutive duplicate lines within one cue payload
pub fn dedupe_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if out.last().map(|prev| prev.trim() == line.trim()) != Some(true) {
            out.push(line);
        }
    }
    out.join("\n")
}

/// Detect ASS vector-drawing payloads.
///
/// True when, after markup removal, the content is empty, a single
/// character that is neither `I` nor a digit, or a token stream of drawing
/// opcodes (`m n l b s p c`) and numbers with density >= 80 %.
pub fn is_ass_drawing_command(text: &str) -> bool {
    let cleaned = remove_markup(text);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return true;
    }

    let mut chars = trimmed.chars();
    if let (Some(only), None) = (chars.next(), chars.next()) {
        return only != 'I' && !only.is_ascii_digit();
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() < 2 {
        return false;
    }

    let mut opcodes = 0usize;
    let mut numbers = 0usize;
    for token in &tokens {
        let mut token_chars = token.chars();
        if let (Some(c), None) = (token_chars.next(), token_chars.next()) {
            if DRAWING_OPCODES.contains(&c.to_ascii_lowercase()) {
                opcodes += 1;
                continue;
            }
        }
        if token.parse::<f64>().is_ok() {
            numbers += 1;
        }
    }

    if opcodes == 0 {
        return false;
    }

    (opcodes + numbers) as f64 / tokens.len() as f64 >= 0.8
}

/// True when a cue carries no translatable content: empty after markup
/// removal, or a single letter that is neither `I` nor a digit
pub fn is_meaningless(text: &str) -> bool {
    let cleaned = remove_markup(text);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return true;
    }

    let mut chars = trimmed.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(only), None) if only != 'I' && !only.is_ascii_digit()
    )
}
