//! Request field validation

use thiserror::Error;

/// Longest accepted address, per RFC 5321
const MAX_EMAIL_LEN: usize = 254;

/// Longest accepted local part
const MAX_LOCAL_LEN: usize = 64;

/// Longest accepted display name
pub const MAX_NAME_LEN: usize = 128;

/// Why a request field was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Email address failed the syntax check
    #[error("invalid email address: {0}")]
    InvalidEmail(&'static str),

    /// Display name is empty or too long
    #[error("invalid name: {0}")]
    InvalidName(&'static str),
}

/// Conservative `local@domain` check
///
/// Accepts a subset of RFC 5322 addresses: no quoting, comments or display
/// names. Single-label domains such as `localhost` are allowed.
pub fn validate_email(email: &str) -> Result<(), FieldError> {
    if email.is_empty() {
        return Err(FieldError::InvalidEmail("empty"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(FieldError::InvalidEmail("too long"));
    }

    let (local, domain) =
        email.rsplit_once('@').ok_or(FieldError::InvalidEmail("missing '@'"))?;

    if local.is_empty() || local.len() > MAX_LOCAL_LEN {
        return Err(FieldError::InvalidEmail("bad local part length"));
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(FieldError::InvalidEmail("misplaced '.' in local part"));
    }
    if !local.chars().all(is_local_char) {
        return Err(FieldError::InvalidEmail("illegal character in local part"));
    }

    if domain.is_empty() {
        return Err(FieldError::InvalidEmail("empty domain"));
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(FieldError::InvalidEmail("bad domain label"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(FieldError::InvalidEmail("domain label starts or ends with '-'"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(FieldError::InvalidEmail("illegal character in domain"));
        }
    }

    Ok(())
}

fn is_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c)
}

/// Display names must be non-blank and reasonably short
pub fn validate_name(name: &str) -> Result<(), FieldError> {
    if name.trim().is_empty() {
        return Err(FieldError::InvalidName("empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(FieldError::InvalidName("too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        for email in [
            "alice@example.com",
            "admin@localhost",
            "first.last+tag@sub.example.co",
            "o'brien@example.ie",
            "x@a-b.io",
        ] {
            assert!(validate_email(email).is_ok(), "{} should be accepted", email);
        }
    }

    #[test]
    fn test_invalid_emails() {
        for email in [
            "",
            "plainaddress",
            "@example.com",
            "alice@",
            "alice@@example.com",
            ".alice@example.com",
            "alice.@example.com",
            "al..ice@example.com",
            "alice@-example.com",
            "alice@example..com",
            "alice smith@example.com",
            "Alice <alice@example.com>",
            "alice@exa_mple.com",
        ] {
            assert!(validate_email(email).is_err(), "{} should be rejected", email);
        }
    }

    #[test]
    fn test_email_length_limits() {
        let long_local = format!("{}@example.com", "a".repeat(65));
        assert!(validate_email(&long_local).is_err());

        let long_total = format!("a@{}.com", "b".repeat(250));
        assert!(validate_email(&long_total).is_err());
    }

    #[test]
    fn test_names() {
        assert!(validate_name("Alice").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"n".repeat(129)).is_err());
    }
}
