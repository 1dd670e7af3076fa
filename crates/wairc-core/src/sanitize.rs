//! IRC-safe names for chats and contacts.
//!
//! Display names are transliterated to ASCII and stripped down to
//! characters that are valid in both nicknames and channel names.

use std::fmt::Write;

/// IRC-safe form of `name`.
///
/// A name with nothing left after stripping becomes `x` followed by the hex
/// encoding of its UTF-8 bytes, so distinct names stay distinct.
pub fn safe_string(name: &str) -> String {
    let safe = strip_unsafe(name);
    if !safe.is_empty() {
        return safe;
    }

    let mut fallback = String::with_capacity(1 + name.len() * 2);
    fallback.push('x');
    for byte in name.as_bytes() {
        let _ = write!(fallback, "{byte:02x}");
    }
    fallback
}

/// Transliterate `name` to ASCII and keep only `[A-Za-z0-9+]`. May be empty.
pub fn strip_unsafe(name: &str) -> String {
    deunicode::deunicode(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+')
        .collect()
}

/// Whether `name` is a bare international phone number such as `+31 6 1234 5678`.
pub fn is_phone_number(name: &str) -> bool {
    match name.strip_prefix('+') {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == ' '),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_string_strips_spaces_and_punctuation() {
        assert_eq!(safe_string("Family Chat!"), "FamilyChat");
        assert_eq!(safe_string("+31 6 12"), "+31612");
    }

    #[test]
    fn test_safe_string_transliterates() {
        assert_eq!(safe_string("Zoë Ångström"), "ZoeAngstrom");
    }

    #[test]
    fn test_safe_string_empty_fallback_is_hex() {
        assert_eq!(safe_string("!!"), "x2121");
        assert_eq!(safe_string(""), "x");
    }

    #[test]
    fn test_is_phone_number() {
        assert!(is_phone_number("+31 6 1234 5678"));
        assert!(!is_phone_number("+"));
        assert!(!is_phone_number("31 6 1234"));
        assert!(!is_phone_number("+31 Bob"));
    }
}
