//! Account and message validation rules shared by every transport.

/// Minimum username length in characters.
pub const USERNAME_MIN: usize = 3;
/// Maximum username length in characters.
pub const USERNAME_MAX: usize = 20;
/// Minimum password length in characters.
pub const PASSWORD_MIN: usize = 8;
/// Upper bound on password length; keeps hashing cost bounded for hostile input.
pub const PASSWORD_MAX: usize = 128;
/// Maximum message board body length in characters.
pub const MESSAGE_MAX: usize = 500;

/// Username validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("Username is too short (minimum 3 characters)")]
    TooShort,

    #[error("Username is too long (maximum 20 characters)")]
    TooLong,

    #[error("Username cannot contain whitespace")]
    Whitespace,

    #[error("Username contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("Password too short (minimum 8 characters)")]
    TooShort,

    #[error("Password too long (maximum 128 characters)")]
    TooLong,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Message cannot be empty")]
    Empty,

    #[error("Message too long (max 500 characters)")]
    TooLong,
}

/// Characters that would corrupt the board line format or the relay tag.
const RESERVED_CHARS: [char; 4] = [':', '<', '>', '\0'];

/// Validate a username. Lengths are counted in characters, not bytes.
pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    let len = username.chars().count();
    if len < USERNAME_MIN {
        return Err(UsernameError::TooShort);
    }
    if len > USERNAME_MAX {
        return Err(UsernameError::TooLong);
    }
    if username.chars().any(char::is_whitespace) {
        return Err(UsernameError::Whitespace);
    }

    let mut invalid: Vec<String> = username
        .chars()
        .filter(|c| c.is_control() || RESERVED_CHARS.contains(c))
        .map(|c| {
            if c.is_control() {
                format!("\\u{{{:04x}}}", c as u32)
            } else {
                c.to_string()
            }
        })
        .collect();
    if !invalid.is_empty() {
        invalid.dedup();
        return Err(UsernameError::InvalidCharacters {
            chars: invalid.join(", "),
        });
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        return Err(PasswordError::TooShort);
    }
    if len > PASSWORD_MAX {
        return Err(PasswordError::TooLong);
    }
    Ok(())
}

/// Validate a board message body and fold embedded line breaks into spaces so
/// that every stored message occupies exactly one line of the board file.
pub fn normalize_message_body(body: &str) -> Result<String, MessageError> {
    let len = body.chars().count();
    if len == 0 {
        return Err(MessageError::Empty);
    }
    if len > MESSAGE_MAX {
        return Err(MessageError::TooLong);
    }
    Ok(body
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_lengths() {
        assert_eq!(validate_username("ab"), Err(UsernameError::TooShort));
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"a".repeat(20)).is_ok());
        assert_eq!(validate_username(&"a".repeat(21)), Err(UsernameError::TooLong));
        // Multi-byte characters count once each
        assert!(validate_username("josé").is_ok());
        assert!(validate_username(&"é".repeat(20)).is_ok());
    }

    #[test]
    fn test_username_characters() {
        assert_eq!(validate_username("al ice"), Err(UsernameError::Whitespace));
        assert_eq!(validate_username(" alice"), Err(UsernameError::Whitespace));
        assert!(matches!(
            validate_username("ali:ce"),
            Err(UsernameError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_username("<alice>"),
            Err(UsernameError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_username("ali\u{7}ce"),
            Err(UsernameError::InvalidCharacters { .. })
        ));
        assert!(validate_username("alice_99").is_ok());
    }

    #[test]
    fn test_password_rules() {
        assert_eq!(validate_password("short"), Err(PasswordError::TooShort));
        assert!(validate_password("password1").is_ok());
        assert!(validate_password(&"p".repeat(PASSWORD_MAX)).is_ok());
        assert_eq!(
            validate_password(&"p".repeat(PASSWORD_MAX + 1)),
            Err(PasswordError::TooLong)
        );
    }

    #[test]
    fn test_message_body_bounds() {
        assert_eq!(normalize_message_body(""), Err(MessageError::Empty));
        assert_eq!(normalize_message_body("x").unwrap(), "x");
        assert_eq!(normalize_message_body(&"x".repeat(500)).unwrap().len(), 500);
        assert_eq!(
            normalize_message_body(&"x".repeat(501)),
            Err(MessageError::TooLong)
        );
    }

    #[test]
    fn test_message_body_line_breaks_folded() {
        assert_eq!(
            normalize_message_body("line one\r\nline two").unwrap(),
            "line one  line two"
        );
    }
}
