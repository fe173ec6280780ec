//! Pseudonyms: the public identifier that replaces a masked user's identity.
//!
//! A pseudonym is the fixed prefix [`PSEUDONYM_PREFIX`] followed by
//! [`PSEUDONYM_BODY_LEN`] characters drawn uniformly from
//! [`PSEUDONYM_ALPHABET`] with the OS random number generator.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    KDF_CONTEXT_AVATAR, PLACEHOLDER_EMAIL_DOMAIN, PLACEHOLDER_USERNAME_PREFIX, PSEUDONYM_ALPHABET,
    PSEUDONYM_BODY_LEN, PSEUDONYM_PREFIX,
};
use crate::error::PseudonymError;

/// A format-checked pseudonym. Only constructible through [`Pseudonym::parse`]
/// or the generator, so holding one means the format is valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pseudonym(String);

impl Pseudonym {
    /// Parse an untrusted candidate.
    pub fn parse(candidate: &str) -> Result<Self, PseudonymError> {
        if validate_format(candidate) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(PseudonymError::InvalidFormat)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The random part after the prefix.
    pub fn body(&self) -> &str {
        &self.0[PSEUDONYM_PREFIX.len()..]
    }

    /// Public username written over the real one at masking time.
    pub fn placeholder_username(&self) -> String {
        format!("{PLACEHOLDER_USERNAME_PREFIX}{}", self.0)
    }

    /// Public email written over the real one at masking time.
    pub fn placeholder_email(&self) -> String {
        format!("{}@{PLACEHOLDER_EMAIL_DOMAIN}", self.0.to_ascii_lowercase())
    }

    fn random() -> Self {
        let mut rng = rand::rngs::OsRng;
        let body: String = (0..PSEUDONYM_BODY_LEN)
            .map(|_| PSEUDONYM_ALPHABET[rng.gen_range(0..PSEUDONYM_ALPHABET.len())] as char)
            .collect();
        Self(format!("{PSEUDONYM_PREFIX}{body}"))
    }
}

impl fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Pseudonym {
    type Error = PseudonymError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if validate_format(&value) {
            Ok(Self(value))
        } else {
            Err(PseudonymError::InvalidFormat)
        }
    }
}

impl From<Pseudonym> for String {
    fn from(p: Pseudonym) -> Self {
        p.0
    }
}

/// Check that `candidate` has the exact pseudonym shape.
pub fn validate_format(candidate: &str) -> bool {
    let Some(body) = candidate.strip_prefix(PSEUDONYM_PREFIX) else {
        return false;
    };
    body.len() == PSEUDONYM_BODY_LEN && body.bytes().all(|b| PSEUDONYM_ALPHABET.contains(&b))
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum GenerateError<E: std::error::Error + 'static> {
    #[error("Pseudonym generation exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Pseudonym uniqueness lookup failed: {0}")]
    Lookup(#[source] E),
}

/// Produces pseudonyms that a caller-supplied lookup reports as unused.
#[derive(Debug, Clone, Copy)]
pub struct PseudonymGenerator {
    max_attempts: u32,
}

impl PseudonymGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Draw candidates until `is_taken` says one is free, up to the retry budget.
    pub fn generate<F, E>(&self, mut is_taken: F) -> Result<Pseudonym, GenerateError<E>>
    where
        F: FnMut(&Pseudonym) -> Result<bool, E>,
        E: std::error::Error + 'static,
    {
        for _ in 0..self.max_attempts {
            let candidate = Pseudonym::random();
            if !is_taken(&candidate).map_err(GenerateError::Lookup)? {
                return Ok(candidate);
            }
        }
        Err(GenerateError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

// ---------------------------------------------------------------------------
// Avatar
// ---------------------------------------------------------------------------

/// Cosmetic avatar parameters derived from a pseudonym. Not security relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarDescriptor {
    /// Hex seed for the client-side pattern renderer.
    pub seed: String,
    /// Background colour as `#rrggbb`.
    pub background: String,
    pub initials: String,
}

pub fn derive_avatar(pseudonym: &Pseudonym) -> AvatarDescriptor {
    let digest = blake3::derive_key(KDF_CONTEXT_AVATAR, pseudonym.as_str().as_bytes());
    AvatarDescriptor {
        seed: hex::encode(&digest[..8]),
        background: format!("#{}", hex::encode(&digest[8..11])),
        initials: pseudonym.body()[..2].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::convert::Infallible;

    use super::*;

    #[test]
    fn test_generated_pseudonym_is_valid() {
        let generator = PseudonymGenerator::new(10);
        let p = generator
            .generate(|_| Ok::<_, Infallible>(false))
            .unwrap();
        assert!(validate_format(p.as_str()));
        assert!(p.as_str().starts_with(PSEUDONYM_PREFIX));
    }

    #[test]
    fn test_validate_format_rejects_bad_input() {
        assert!(validate_format("PN-ABCDEFGH23"));
        assert!(!validate_format(""));
        assert!(!validate_format("PN-"));
        assert!(!validate_format("PN-ABCDEFGH2"));
        assert!(!validate_format("PN-ABCDEFGH234"));
        assert!(!validate_format("pn-ABCDEFGH23"));
        assert!(!validate_format("PN-abcdefgh23"));
        // 0, O, 1 and I are not in the alphabet
        assert!(!validate_format("PN-ABCDEFGH01"));
        assert!(!validate_format("XX-ABCDEFGH23"));
        assert!(!validate_format("PN-ABCD'; --23"));
    }

    #[test]
    fn test_generated_values_are_distinct() {
        let generator = PseudonymGenerator::new(10);
        let mut seen = HashSet::new();
        for _ in 0..10 {
            let p = generator
                .generate(|c| Ok::<_, Infallible>(seen.contains(c)))
                .unwrap();
            assert!(seen.insert(p));
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_forced_collisions_exhaust_budget() {
        let generator = PseudonymGenerator::new(10);
        let mut calls = 0;
        let err = generator
            .generate(|_| {
                calls += 1;
                Ok::<_, Infallible>(true)
            })
            .unwrap_err();

        assert!(matches!(err, GenerateError::Exhausted { attempts: 10 }));
        assert_eq!(calls, 10);
    }

    #[test]
    fn test_collision_then_success() {
        let generator = PseudonymGenerator::new(3);
        let mut calls = 0;
        let result = generator.generate(|_| {
            calls += 1;
            Ok::<_, Infallible>(calls < 3)
        });
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_lookup_error_propagates() {
        let generator = PseudonymGenerator::new(5);
        let err = generator
            .generate(|_| Err(std::fmt::Error))
            .unwrap_err();
        assert!(matches!(err, GenerateError::Lookup(_)));
    }

    #[test]
    fn test_serde_rejects_malformed() {
        let ok: Pseudonym = serde_json::from_str("\"PN-ABCDEFGH23\"").unwrap();
        assert_eq!(ok.as_str(), "PN-ABCDEFGH23");
        assert!(serde_json::from_str::<Pseudonym>("\"alice\"").is_err());
    }

    #[test]
    fn test_placeholders() {
        let p = Pseudonym::parse("PN-ABCDEFGH23").unwrap();
        assert_eq!(p.placeholder_username(), "User_PN-ABCDEFGH23");
        assert_eq!(p.placeholder_email(), "pn-abcdefgh23@masked.invalid");
    }

    #[test]
    fn test_avatar_is_deterministic() {
        let p = Pseudonym::parse("PN-ABCDEFGH23").unwrap();
        let q = Pseudonym::parse("PN-ZZZZZZZZ99").unwrap();

        assert_eq!(derive_avatar(&p), derive_avatar(&p));
        assert_ne!(derive_avatar(&p).seed, derive_avatar(&q).seed);
        assert_eq!(derive_avatar(&p).initials, "AB");
        assert_eq!(derive_avatar(&p).background.len(), 7);
    }
}
