//! Application ID type.
//!
//! Unlike randomly generated IDs, an [`AppId`] is derived from the content of
//! a compose descriptor, so the same descriptor always maps to the same app.

use sha1::{Digest, Sha1};

use crate::error::IdError;
use crate::image::strip_tag;

/// Content-addressed application ID (40 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppId(String);

impl AppId {
    /// Length of the hex-encoded SHA-1 digest.
    pub const LEN: usize = 40;

    /// Derives an ID from `(service_name, image)` pairs.
    ///
    /// Each service contributes `service_name || image_without_tag`. The
    /// characters of the concatenation are sorted by code point before
    /// hashing, which makes the result independent of service order.
    pub fn derive<I, N, R>(services: I) -> Result<Self, IdError>
    where
        I: IntoIterator<Item = (N, Option<R>)>,
        N: AsRef<str>,
        R: AsRef<str>,
    {
        let mut tokens = String::new();
        let mut count = 0usize;

        for (name, image) in services {
            let name = name.as_ref();
            let Some(image) = image else {
                return Err(IdError::MissingImage {
                    service: name.to_string(),
                });
            };
            tokens.push_str(name);
            tokens.push_str(&strip_tag(image.as_ref()));
            count += 1;
        }

        if count == 0 {
            return Err(IdError::NoServices);
        }

        let mut chars: Vec<char> = tokens.chars().collect();
        chars.sort_unstable();
        let sorted: String = chars.into_iter().collect();

        let digest = Sha1::digest(sorted.as_bytes());
        Ok(Self(hex::encode(digest)))
    }

    /// Parses an ID from a string.
    ///
    /// The string must be exactly 40 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        if s.len() != Self::LEN {
            return Err(IdError::InvalidLength {
                expected: Self::LEN,
                actual: s.len(),
            });
        }

        if let Some(c) = s
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(IdError::InvalidCharacter(c));
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AppId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for AppId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for AppId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
