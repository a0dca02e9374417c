use anyhow::{anyhow, Result};
use isolang::Language;

/// Language utilities for ISO language code handling
///
/// This module provides functions for validating, normalizing, and
/// matching ISO 639-1 (2-letter) and ISO 639-2 (3-letter) language codes.
/// Embedded subtitle tracks are tagged with 639-2 codes while operator
/// settings usually carry 639-1 codes; everything is compared in
/// normalized 639-2/T form.

/// ISO 639-2/B codes that differ from their 639-2/T counterpart.
/// isolang only speaks 639-2/T, so these are mapped by hand.
const PART2B_TO_PART2T: &[(&str, &str)] = &[
    ("fre", "fra"), // French
    ("ger", "deu"), // German
    ("dut", "nld"), // Dutch
    ("gre", "ell"), // Greek
    ("chi", "zho"), // Chinese
    ("cze", "ces"), // Czech
    ("ice", "isl"), // Icelandic
    ("alb", "sqi"), // Albanian
    ("arm", "hye"), // Armenian
    ("baq", "eus"), // Basque
    ("bur", "mya"), // Burmese
    ("per", "fas"), // Persian
    ("geo", "kat"), // Georgian
    ("may", "msa"), // Malay
    ("mac", "mkd"), // Macedonian
    ("rum", "ron"), // Romanian
    ("slo", "slk"), // Slovak
    ("wel", "cym"), // Welsh
];

fn part2b_to_part2t(code: &str) -> Option<&'static str> {
    PART2B_TO_PART2T
        .iter()
        .find(|(b, _)| *b == code)
        .map(|(_, t)| *t)
}

/// Validate that a code is a known ISO 639-1 or ISO 639-2 language code
pub fn validate_language_code(code: &str) -> Result<()> {
    normalize_to_part2t(code).map(|_| ())
}

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String> {
    let normalized_code = code.trim().to_lowercase();

    if normalized_code.len() == 2 {
        if let Some(lang) = Language::from_639_1(&normalized_code) {
            return Ok(lang.to_639_3().to_string());
        }
    } else if normalized_code.len() == 3 {
        if Language::from_639_3(&normalized_code).is_some() {
            return Ok(normalized_code);
        }
        if let Some(part2t) = part2b_to_part2t(&normalized_code) {
            return Ok(part2t.to_string());
        }
    }

    Err(anyhow!("Cannot normalize invalid language code: {}", code))
}

/// Normalize a language code to ISO 639-1 (2-letter) format if possible,
/// falling back to ISO 639-2/T when no 2-letter code exists
pub fn normalize_to_part1_or_part2t(code: &str) -> Result<String> {
    let part2t = normalize_to_part2t(code)?;

    if let Some(lang) = Language::from_639_3(&part2t) {
        if let Some(code_639_1) = lang.to_639_1() {
            return Ok(code_639_1.to_string());
        }
    }

    Ok(part2t)
}

/// Check if two language codes refer to the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (normalize_to_part2t(code1), normalize_to_part2t(code2)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Get the English language name for a code
pub fn get_language_name(code: &str) -> Result<String> {
    let part2t = normalize_to_part2t(code)?;

    Language::from_639_3(&part2t)
        .map(|lang| lang.to_name().to_string())
        .ok_or_else(|| anyhow!("Could not find language name for code: {}", code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_language_code() {
        assert!(validate_language_code("en").is_ok());
        assert!(validate_language_code("eng").is_ok());
        assert!(validate_language_code("fre").is_ok());
        assert!(validate_language_code(" EN ").is_ok());

        assert!(validate_language_code("xyz").is_err());
        assert!(validate_language_code("123").is_err());
        assert!(validate_language_code("e").is_err());
    }

    #[test]
    fn test_normalize_to_part2t() {
        assert_eq!(normalize_to_part2t("en").unwrap(), "eng");
        assert_eq!(normalize_to_part2t("fr").unwrap(), "fra");
        assert_eq!(normalize_to_part2t("eng").unwrap(), "eng");
        // 639-2/B is converted to 639-2/T
        assert_eq!(normalize_to_part2t("ger").unwrap(), "deu");
        assert_eq!(normalize_to_part2t("fre").unwrap(), "fra");

        assert!(normalize_to_part2t("nope").is_err());
    }

    #[test]
    fn test_normalize_to_part1_or_part2t() {
        assert_eq!(normalize_to_part1_or_part2t("eng").unwrap(), "en");
        assert_eq!(normalize_to_part1_or_part2t("fre").unwrap(), "fr");
        assert_eq!(normalize_to_part1_or_part2t("ro").unwrap(), "ro");
    }

    #[test]
    fn test_language_codes_match() {
        assert!(language_codes_match("en", "eng"));
        assert!(language_codes_match("fre", "fra"));
        assert!(language_codes_match("de", "ger"));
        assert!(!language_codes_match("en", "fr"));
        assert!(!language_codes_match("en", "bogus"));
    }

    #[test]
    fn test_get_language_name() {
        assert_eq!(get_language_name("en").unwrap(), "English");
        assert_eq!(get_language_name("ger").unwrap(), "German");
        assert!(get_language_name("zz").is_err());
    }
}
