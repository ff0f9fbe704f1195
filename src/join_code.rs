//! Join code generation and parsing
//!
//! A join code is the short string a host shares out-of-band so players can
//! find the session. Codes are six characters drawn from digits and
//! uppercase letters, which keeps them easy to read aloud and type on a
//! phone. Uniqueness is not a property of the code itself; the registry
//! retries generation until it finds a code with no live session.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

/// Number of characters in a join code
pub const CODE_LENGTH: usize = 6;

/// Alphabet the code characters are drawn from
const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A short unique string identifying a live session.
///
/// Codes are stored as raw bytes so they stay `Copy` and cheap to use as a
/// map key. Parsing is case-insensitive; the canonical form is uppercase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct JoinCode([u8; CODE_LENGTH]);

/// Error returned when parsing a join code from a string
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The string is not exactly [`CODE_LENGTH`] characters long
    #[error("join code must be exactly {CODE_LENGTH} characters")]
    WrongLength,
    /// The string contains a character outside `0-9A-Z`
    #[error("join code may only contain digits and letters")]
    InvalidCharacter,
}

impl JoinCode {
    /// Generates a random join code.
    ///
    /// The result is *not* guaranteed to be unused; callers that need
    /// uniqueness must check against their own mapping and retry.
    pub fn random() -> Self {
        let mut bytes = [0u8; CODE_LENGTH];
        for byte in &mut bytes {
            *byte = ALPHABET[fastrand::usize(..ALPHABET.len())];
        }
        Self(bytes)
    }
}

impl Display for JoinCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Invariant: the bytes always come from ALPHABET, which is ASCII.
        for byte in self.0 {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

impl FromStr for JoinCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CODE_LENGTH {
            return Err(ParseError::WrongLength);
        }

        let mut bytes = [0u8; CODE_LENGTH];
        for (slot, c) in bytes.iter_mut().zip(s.chars()) {
            let c = c.to_ascii_uppercase();
            if !c.is_ascii_alphanumeric() {
                return Err(ParseError::InvalidCharacter);
            }
            *slot = c as u8;
        }

        Ok(Self(bytes))
    }
}
