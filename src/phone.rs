//! Polish phone number validation.
//!
//! Two checks with different strictness exist on purpose:
//!
//! * [`normalize_phone`] accepts loosely typed input (spaces, optional `+48`
//!   prefix) and produces the display form `+48 DDD DDD DDD`. It is used when
//!   numbers are entered and when the matcher builds delivery jobs.
//! * [`is_valid_phone`] only checks that the number already carries the
//!   `+48` prefix followed by nine digits once whitespace is removed. The
//!   delivery worker uses it to drop jobs carrying bad upstream data.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const COUNTRY_CODE: &str = "48";
const NATIONAL_LENGTH: usize = 9;

static WIRE_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+48\d{9}$").expect("wire format regex"));

/// Reasons a phone number cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number must have 9 digits after the country code, got {0} characters")]
    InvalidLength(usize),
    #[error("phone number must contain only digits")]
    InvalidDigits,
}

/// Normalizes a Polish phone number into `+48 DDD DDD DDD`.
///
/// Whitespace and a leading `+` are removed. The `48` country code is
/// stripped only when the remaining input is longer than a national number,
/// so a nine-digit national number that itself starts with `48` is kept.
pub fn normalize_phone(input: &str) -> Result<String, PhoneError> {
    let national = national_digits(input)?;
    Ok(format!(
        "+{COUNTRY_CODE} {} {} {}",
        &national[0..3],
        &national[3..6],
        &national[6..9]
    ))
}

/// Normalizes into the compact wire form `+48DDDDDDDDD` sent to the gateway.
pub fn to_wire_format(input: &str) -> Result<String, PhoneError> {
    national_digits(input).map(|national| format!("+{COUNTRY_CODE}{national}"))
}

/// Cheap predicate: `^\+48\d{9}$` after removing all whitespace.
pub fn is_valid_phone(input: &str) -> bool {
    WIRE_FORMAT.is_match(&strip_whitespace(input))
}

/// Removes every whitespace character.
pub fn strip_whitespace(input: &str) -> String {
    input.chars().filter(|c| !c.is_whitespace()).collect()
}

fn national_digits(input: &str) -> Result<String, PhoneError> {
    let compact = strip_whitespace(input);
    let without_plus = compact.strip_prefix('+').unwrap_or(&compact);

    let national = match without_plus.strip_prefix(COUNTRY_CODE) {
        Some(rest) if without_plus.chars().count() > NATIONAL_LENGTH => rest,
        _ => without_plus,
    };

    let length = national.chars().count();
    if length != NATIONAL_LENGTH {
        return Err(PhoneError::InvalidLength(length));
    }
    if !national.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::InvalidDigits);
    }

    Ok(national.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_with_and_without_country_code() {
        for digits in ["606181071", "123456789", "481234567", "000000000"] {
            let expected = format!(
                "+48 {} {} {}",
                &digits[0..3],
                &digits[3..6],
                &digits[6..9]
            );
            assert_eq!(normalize_phone(digits).unwrap(), expected);
            assert_eq!(normalize_phone(&format!("+48{digits}")).unwrap(), expected);
            assert_eq!(normalize_phone(&format!("48{digits}")).unwrap(), expected);
        }
    }

    #[test]
    fn tolerates_whitespace_anywhere() {
        assert_eq!(
            normalize_phone(" +48 606 181 071 ").unwrap(),
            "+48 606 181 071"
        );
        assert_eq!(normalize_phone("606\t181\n071").unwrap(), "+48 606 181 071");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(normalize_phone("12345678"), Err(PhoneError::InvalidLength(8)));
        assert_eq!(
            normalize_phone("+48 1234 567 890"),
            Err(PhoneError::InvalidLength(10))
        );
        assert_eq!(normalize_phone(""), Err(PhoneError::InvalidLength(0)));
        assert!(matches!(
            normalize_phone("123-456-789"),
            Err(PhoneError::InvalidLength(_))
        ));
    }

    #[test]
    fn rejects_non_digits() {
        assert_eq!(normalize_phone("12345678a"), Err(PhoneError::InvalidDigits));
        assert_eq!(normalize_phone("+48 606-18107"), Err(PhoneError::InvalidDigits));
    }

    #[test]
    fn loose_predicate_requires_prefix() {
        assert!(is_valid_phone("+48606181071"));
        assert!(is_valid_phone("+48 606 181 071"));
        assert!(!is_valid_phone("606181071"));
        assert!(!is_valid_phone("48606181071"));
        assert!(!is_valid_phone("+4860618107"));
        assert!(!is_valid_phone("+49606181071"));
    }

    #[test]
    fn strict_and_loose_checks_disagree_on_bare_numbers() {
        // Accepted by the normalizer, rejected by the delivery filter.
        assert!(normalize_phone("606 181 071").is_ok());
        assert!(!is_valid_phone("606 181 071"));

        // Normalized output always passes the delivery filter.
        let normalized = normalize_phone("606 181 071").unwrap();
        assert!(is_valid_phone(&normalized));
    }

    #[test]
    fn wire_format_is_compact() {
        assert_eq!(to_wire_format("606 181 071").unwrap(), "+48606181071");
        assert_eq!(to_wire_format("+48 606 181 071").unwrap(), "+48606181071");
        assert!(to_wire_format("60618107").is_err());
    }
}
