use std::fmt::{self, Display};

/// Identifier of a spooled mail
///
/// A ULID: unique, and lexicographically sortable by creation time, so a
/// sorted listing is oldest first. It doubles as the file stem in the file
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpooledMailId {
    id: ulid::Ulid,
}

impl SpooledMailId {
    /// Parse an id from a spool filename like `01ARYZ6S41....bin`
    ///
    /// Anything with a path separator, a `..`, another extension or a stem
    /// that is not a ULID is rejected.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename
            .strip_suffix(".bin")
            .or_else(|| filename.strip_suffix(".eml"))?;

        Self::parse(stem)
    }

    /// Parse the textual form of an id
    pub fn parse(id: &str) -> Option<Self> {
        ulid::Ulid::from_string(id.trim()).ok().map(Self::new)
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which the id was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl Display for SpooledMailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl serde::Serialize for SpooledMailId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SpooledMailId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_validation() {
        assert!(SpooledMailId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_some());
        assert!(SpooledMailId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml").is_some());

        assert!(SpooledMailId::from_filename("../etc/passwd.bin").is_none());
        assert!(SpooledMailId::from_filename("foo/bar.bin").is_none());
        assert!(SpooledMailId::from_filename("..\\windows\\system32.bin").is_none());
        assert!(SpooledMailId::from_filename("not_a_valid_ulid.bin").is_none());
        assert!(SpooledMailId::from_filename(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_none());
        assert!(SpooledMailId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.json").is_none());
    }

    #[test]
    fn test_ordering_follows_generation() {
        let first = SpooledMailId::new(ulid::Ulid::from_parts(1_000, 7));
        let second = SpooledMailId::new(ulid::Ulid::from_parts(2_000, 1));
        assert!(first < second);
        assert_eq!(second.timestamp_ms(), 2_000);
        assert_eq!(SpooledMailId::parse(&first.to_string()), Some(first));
    }
}
