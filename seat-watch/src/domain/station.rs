//! Station telegraph codes and name lookup.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

/// Error returned when parsing an invalid station code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid station code: {reason}")]
pub struct InvalidStationCode {
    reason: &'static str,
}

/// A valid 3-letter station telegraph code, e.g. `BJP` or `SHH`.
///
/// Telegraph codes are always 3 uppercase ASCII letters. This type is used
/// where the crate itself names a station (query targets, configuration);
/// codes read back from listing records are kept verbatim instead, because
/// the listing format is not under our control.
///
/// # Examples
///
/// ```
/// use seat_watch::domain::StationCode;
///
/// let bjp = StationCode::parse("BJP").unwrap();
/// assert_eq!(bjp.as_str(), "BJP");
///
/// assert!(StationCode::parse("bjp").is_err());
/// assert!(StationCode::parse("BJPX").is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StationCode([u8; 3]);

impl StationCode {
    /// Parse a station code from a string.
    ///
    /// The input must be exactly 3 uppercase ASCII letters (A-Z).
    pub fn parse(s: &str) -> Result<Self, InvalidStationCode> {
        let bytes = s.as_bytes();

        if bytes.len() != 3 {
            return Err(InvalidStationCode {
                reason: "must be exactly 3 characters",
            });
        }

        if !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(InvalidStationCode {
                reason: "must be uppercase ASCII letters A-Z",
            });
        }

        Ok(StationCode([bytes[0], bytes[1], bytes[2]]))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        // Only ASCII uppercase letters are ever stored.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Debug for StationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StationCode({})", self.as_str())
    }
}

impl fmt::Display for StationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StationCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StationCode::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A station as it appears on a listing record: the raw code plus the
/// best name we could resolve for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRef {
    /// Code exactly as it appeared in the record.
    pub code: String,
    /// Resolved display name, or the raw code when unknown.
    pub name: String,
}

/// Code → display name lookup.
///
/// Built from the code map that accompanies every listing response. Lookups
/// for unknown codes fall back to the code itself, never to a blank.
#[derive(Debug, Clone, Default)]
pub struct StationNames {
    names: HashMap<String, String>,
}

impl StationNames {
    /// Create a lookup from a code → name map.
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Look up a station name by code.
    pub fn get(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    /// Resolve a raw code into a [`StationRef`].
    pub fn resolve(&self, code: &str) -> StationRef {
        let name = match self.get(code) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => code.to_string(),
        };
        StationRef {
            code: code.to_string(),
            name,
        }
    }

    /// Get the number of known stations.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the lookup is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(String, String)> for StationNames {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_codes() {
        assert!(StationCode::parse("BJP").is_ok());
        assert!(StationCode::parse("SHH").is_ok());
        assert!(StationCode::parse("AAA").is_ok());
    }

    #[test]
    fn reject_lowercase() {
        assert!(StationCode::parse("bjp").is_err());
        assert!(StationCode::parse("Bjp").is_err());
    }

    #[test]
    fn reject_wrong_length() {
        assert!(StationCode::parse("").is_err());
        assert!(StationCode::parse("BJ").is_err());
        assert!(StationCode::parse("BJPX").is_err());
    }

    #[test]
    fn reject_non_ascii() {
        assert!(StationCode::parse("B1P").is_err());
        assert!(StationCode::parse("北京").is_err());
    }

    #[test]
    fn display_and_debug() {
        let code = StationCode::parse("SHH").unwrap();
        assert_eq!(format!("{}", code), "SHH");
        assert_eq!(format!("{:?}", code), "StationCode(SHH)");
    }

    #[test]
    fn deserialize_validates() {
        #[derive(Deserialize)]
        struct Wrapper {
            code: StationCode,
        }

        let ok: Wrapper = toml::from_str(r#"code = "BJP""#).unwrap();
        assert_eq!(ok.code.as_str(), "BJP");

        let bad: Result<Wrapper, _> = toml::from_str(r#"code = "bj""#);
        assert!(bad.is_err());
    }

    #[test]
    fn resolve_known_and_unknown() {
        let names: StationNames = [("BJP".to_string(), "北京".to_string())]
            .into_iter()
            .collect();

        let known = names.resolve("BJP");
        assert_eq!(known.code, "BJP");
        assert_eq!(known.name, "北京");

        let unknown = names.resolve("XYZ");
        assert_eq!(unknown.name, "XYZ");
    }

    #[test]
    fn blank_name_falls_back_to_code() {
        let names: StationNames = [("BJP".to_string(), String::new())].into_iter().collect();
        assert_eq!(names.resolve("BJP").name, "BJP");
    }
}
