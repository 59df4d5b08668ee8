//! Credential gate.
//!
//! Pure checks run before any call reaches the identity platform.

use thiserror::Error;

/// Maximum length of an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;
/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Maximum accepted password length, in characters.
pub const MAX_PASSWORD_LEN: usize = 128;
/// Literal the user must type to arm the destructive action.
pub const CONFIRMATION_KEYWORD: &str = "DELETE";

/// Commonly used passwords that are always rejected (compared lowercase).
const COMMON_PASSWORDS: &[&str] = &[
    "123456",
    "1234567",
    "12345678",
    "123456789",
    "111111",
    "123123",
    "abc123",
    "password",
    "password1",
    "passwort",
    "qwerty",
    "qwertz",
    "letmein",
    "welcome",
    "iloveyou",
    "monkey",
    "dragon",
    "sunshine",
    "football",
    "admin123",
];

/// Why an email address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("Please enter your email address.")]
    Empty,
    #[error("The email address is too long.")]
    TooLong,
    #[error("Please enter a valid email address.")]
    Malformed,
    #[error("The email address must not contain consecutive dots.")]
    ConsecutiveDots,
    #[error("The email address must not start or end with a dot.")]
    EdgeDot,
    #[error("The email domain is not valid.")]
    InvalidDomain,
}

/// Why a password was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("Please enter your password.")]
    Empty,
    #[error("The password must be at least 6 characters long.")]
    TooShort,
    #[error("The password must be at most 128 characters long.")]
    TooLong,
    #[error("This password is too common.")]
    TooCommon,
}

/// Why the double confirmation is not satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfirmationError {
    #[error("Type DELETE to confirm.")]
    KeywordMismatch,
    #[error("Please acknowledge that this action cannot be undone.")]
    NotAcknowledged,
}

impl ConfirmationError {
    /// Form field the error belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            ConfirmationError::KeywordMismatch => "confirmText",
            ConfirmationError::NotAcknowledged => "acknowledged",
        }
    }
}

/// Validate the shape of an email address.
pub fn validate_email(input: &str) -> Result<(), EmailError> {
    let email = input.trim();
    if email.is_empty() {
        return Err(EmailError::Empty);
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(EmailError::TooLong);
    }

    let (local, domain) = email.split_once('@').ok_or(EmailError::Malformed)?;
    let shape_ok = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace);
    if !shape_ok {
        return Err(EmailError::Malformed);
    }

    if email.contains("..") {
        return Err(EmailError::ConsecutiveDots);
    }
    if email.starts_with('.') || email.ends_with('.') {
        return Err(EmailError::EdgeDot);
    }

    if !domain.contains('.') || domain.chars().count() < 4 {
        return Err(EmailError::InvalidDomain);
    }

    Ok(())
}

/// Validate a password against the length bounds and the denylist.
pub fn validate_password(input: &str) -> Result<(), PasswordError> {
    if input.is_empty() {
        return Err(PasswordError::Empty);
    }

    let len = input.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    if len > MAX_PASSWORD_LEN {
        return Err(PasswordError::TooLong);
    }

    let lowered = input.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        return Err(PasswordError::TooCommon);
    }

    Ok(())
}

/// Whether the destructive control is enabled.
///
/// Requires the exact, case-sensitive keyword and the acknowledgment at the
/// same time.
pub fn deletion_armed(confirm_text: &str, acknowledged: bool) -> bool {
    validate_confirmation(confirm_text, acknowledged).is_ok()
}

/// Check the double confirmation, reporting the first unmet condition.
pub fn validate_confirmation(confirm_text: &str, acknowledged: bool) -> Result<(), ConfirmationError> {
    if confirm_text != CONFIRMATION_KEYWORD {
        return Err(ConfirmationError::KeywordMismatch);
    }
    if !acknowledged {
        return Err(ConfirmationError::NotAcknowledged);
    }
    Ok(())
}
