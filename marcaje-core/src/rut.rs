//! Validation and masking for Chilean RUT identifiers.
//!
//! A RUT as the portal expects it is a 7-8 digit body followed by a
//! verification character (digit or `k`), with no dots or dashes. RUTs
//! are secrets: they must never reach logs or notification bodies
//! unmasked.

const MASK_CHAR: char = '*';
const VISIBLE_PREFIX: usize = 4;

/// Returns true iff the token has a valid RUT shape (8-9 chars, numeric
/// body, trailing digit or `k`/`K`).
pub fn is_valid(rut: &str) -> bool {
    let len = rut.chars().count();
    if !(8..=9).contains(&len) {
        return false;
    }
    let mut chars = rut.chars();
    let last = match chars.next_back() {
        Some(ch) => ch,
        None => return false,
    };
    if !last.is_ascii_digit() && !last.eq_ignore_ascii_case(&'k') {
        return false;
    }
    chars.as_str().chars().all(|ch| ch.is_ascii_digit())
}

/// Masks a RUT for logs and notifications: same length, first four
/// characters preserved, the rest replaced. Tokens of four characters
/// or fewer are fully masked.
pub fn mask(rut: &str) -> String {
    let len = rut.chars().count();
    if len <= VISIBLE_PREFIX {
        return MASK_CHAR.to_string().repeat(len);
    }
    let prefix: String = rut.chars().take(VISIBLE_PREFIX).collect();
    let masked: String = MASK_CHAR.to_string().repeat(len - VISIBLE_PREFIX);
    format!("{prefix}{masked}")
}

/// Case-insensitive membership test against the configured skip-list.
pub fn is_exception(rut: &str, exceptions: &[String]) -> bool {
    exceptions
        .iter()
        .any(|entry| entry.eq_ignore_ascii_case(rut))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_digit_and_k_verifiers() {
        assert!(is_valid("11111111k"));
        assert!(is_valid("11111111K"));
        assert!(is_valid("222222222"));
        assert!(is_valid("1234567k"));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(!is_valid(""));
        assert!(!is_valid("1234567"));
        assert!(!is_valid("1234567890"));
        assert!(!is_valid("12345x78"));
        assert!(!is_valid("12345678x"));
        assert!(!is_valid("1234567kk"));
    }

    #[test]
    fn mask_preserves_length_and_prefix() {
        let rut = "11111111k";
        let masked = mask(rut);
        assert_eq!(masked.chars().count(), rut.chars().count());
        assert!(masked.starts_with("1111"));
        assert!(masked.chars().skip(4).all(|ch| ch == '*'));
    }

    #[test]
    fn short_tokens_are_fully_masked() {
        assert_eq!(mask("123"), "***");
        assert_eq!(mask(""), "");
    }

    #[test]
    fn exception_check_is_case_insensitive() {
        let exceptions = vec!["11111111K".to_string()];
        assert!(is_exception("11111111k", &exceptions));
        assert!(!is_exception("222222222", &exceptions));
        assert!(!is_exception("11111111k", &[]));
    }
}
