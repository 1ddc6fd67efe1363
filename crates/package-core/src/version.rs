//! Three-part versions used for both the package format and the host application.
//!
//! Versions are stored in the archive as plain strings (`version`, `{app}/version`).
//! Missing components parse as zero, so `"2"` and `"2.0"` both equal `2.0.0`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,

    #[error("Too many version components in '{0}'")]
    TooManyComponents(String),

    #[error("Invalid version component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },
}

/// A `major.minor.patch` version, totally ordered component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// The version assumed for legacy packages that carry no version entry.
    pub const ZERO: Version = Version::new(0, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut parts = [0u32; 3];
        for (i, component) in trimmed.split('.').enumerate() {
            if i >= parts.len() {
                return Err(VersionError::TooManyComponents(trimmed.to_string()));
            }
            parts[i] = component
                .parse()
                .map_err(|_| VersionError::InvalidComponent {
                    input: trimmed.to_string(),
                    component: component.to_string(),
                })?;
        }

        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_and_partial() {
        assert_eq!("1.2.3".parse::<Version>().unwrap(), Version::new(1, 2, 3));
        assert_eq!("4".parse::<Version>().unwrap(), Version::new(4, 0, 0));
        assert_eq!(" 2.5 ".parse::<Version>().unwrap(), Version::new(2, 5, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<Version>(), Err(VersionError::Empty));
        assert!(matches!(
            "1.2.3.4".parse::<Version>(),
            Err(VersionError::TooManyComponents(_))
        ));
        assert!(matches!(
            "1.x".parse::<Version>(),
            Err(VersionError::InvalidComponent { .. })
        ));
    }

    #[test]
    fn test_ordering_is_numeric() {
        let v9: Version = "1.9.0".parse().unwrap();
        let v10: Version = "1.10.0".parse().unwrap();
        assert!(v9 < v10);
        assert!(Version::ZERO < v9);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Version::new(3, 1, 4)).unwrap();
        assert_eq!(json, "\"3.1.4\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Version::new(3, 1, 4));
    }
}
