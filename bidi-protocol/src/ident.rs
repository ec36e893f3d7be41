//! Identifier validation for user and data-set ids.
//!
//! Ids double as file names on the server, so they are limited in length and
//! must not contain path or shell meta characters.

use crate::{ACTIVATION_USER_ID, ADMIN_USER_ID};

pub const IDENTIFIER_MIN_LEN: usize = 1;
pub const IDENTIFIER_MAX_LEN: usize = 255;

/// Characters that may not appear anywhere in an identifier.
pub const INVALID_CHARACTERS: [char; 10] = ['.', '\\', '/', '"', '\'', '*', '<', '>', '?', '|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierCheck {
    Ok,
    TooShort,
    TooLong,
    InvalidCharacters,
}

impl IdentifierCheck {
    pub fn is_ok(&self) -> bool {
        *self == IdentifierCheck::Ok
    }
}

/// Checks an identifier. Length is checked before characters.
pub fn check_identifier(id: &str) -> IdentifierCheck {
    let len = id.chars().count();
    if len < IDENTIFIER_MIN_LEN {
        IdentifierCheck::TooShort
    } else if len > IDENTIFIER_MAX_LEN {
        IdentifierCheck::TooLong
    } else if id.chars().any(|c| INVALID_CHARACTERS.contains(&c)) {
        IdentifierCheck::InvalidCharacters
    } else {
        IdentifierCheck::Ok
    }
}

/// The forbidden characters, space separated, for user-facing messages.
pub fn invalid_characters_display() -> String {
    INVALID_CHARACTERS
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reserved ids are any that contain one of the pseudo-identities.
pub fn is_reserved_user_id(id: &str) -> bool {
    id.contains(ACTIVATION_USER_ID) || id.contains(ADMIN_USER_ID)
}

/// A user id a real user may hold.
pub fn is_user_id_valid(id: &str) -> bool {
    !is_reserved_user_id(id) && check_identifier(id).is_ok()
}
