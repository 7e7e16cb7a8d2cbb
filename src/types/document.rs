//! Brazilian taxpayer document (CPF) value object

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// CPF normalized to its digits.
///
/// Construction never fails: every non-digit is stripped and whatever digits remain are
/// kept, whatever their count. The 11-digit rule is enforced where documents are accepted
/// (request validation and the `VARCHAR(11)` column), not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Document(String);

impl Document {
    /// Number of digits in a complete CPF
    pub const LENGTH: usize = 11;

    pub fn from_raw(raw: &str) -> Self {
        Self(raw.chars().filter(|c| c.is_ascii_digit()).collect())
    }

    /// The normalized digit string
    pub fn value(&self) -> &str {
        &self.0
    }

    /// `XXX.XXX.XXX-XX` for complete documents, the bare digits otherwise.
    pub fn formatted(&self) -> String {
        if self.0.len() != Self::LENGTH {
            return self.0.clone();
        }

        format!(
            "{}.{}.{}-{}",
            &self.0[0..3],
            &self.0[3..6],
            &self.0[6..9],
            &self.0[9..11]
        )
    }

    pub fn has_valid_length(&self) -> bool {
        self.0.len() == Self::LENGTH
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Document {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_raw(&raw))
    }
}
