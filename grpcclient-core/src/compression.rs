//! Compression codec names.
//!
//! The client never compresses anything itself. It only selects one of a
//! fixed set of codec names, which the transport advertises in the
//! `grpc-encoding` header and hands to its own codec implementation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported compression codecs.
///
/// "No compression" is not a variant: it is represented as
/// `Option::<Compression>::None` and spelled as the empty string in
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Snappy,
}

impl Compression {
    /// Every codec a client may select.
    pub const ALL: [Compression; 2] = [Compression::Gzip, Compression::Snappy];

    /// Get the codec name as it appears in `grpc-encoding`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
        }
    }

    /// Resolve a configured codec name.
    ///
    /// The empty string disables compression and yields `Ok(None)`. Any name
    /// outside the supported set is an error.
    ///
    /// ```
    /// use grpcclient_core::Compression;
    ///
    /// assert_eq!(Compression::from_name("gzip"), Ok(Some(Compression::Gzip)));
    /// assert_eq!(Compression::from_name(""), Ok(None));
    /// assert!(Compression::from_name("zstd").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Option<Self>, UnsupportedCompression> {
        if name.is_empty() {
            return Ok(None);
        }
        name.parse().map(Some)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = UnsupportedCompression;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gzip" => Ok(Self::Gzip),
            "snappy" => Ok(Self::Snappy),
            other => Err(UnsupportedCompression(other.to_string())),
        }
    }
}

/// A codec name outside the supported set.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported compression type: {0:?} (supported values are 'gzip', 'snappy' and '')")]
pub struct UnsupportedCompression(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_supported() {
        assert_eq!(Compression::from_name("gzip"), Ok(Some(Compression::Gzip)));
        assert_eq!(Compression::from_name("snappy"), Ok(Some(Compression::Snappy)));
        assert_eq!(Compression::from_name(""), Ok(None));
    }

    #[test]
    fn test_from_name_rejects_everything_else() {
        for name in ["zstd", "br", "deflate", "identity", "GZIP", " gzip", "snappy ", "none"] {
            let err = Compression::from_name(name).unwrap_err();
            assert_eq!(err, UnsupportedCompression(name.to_string()));
        }
    }

    #[test]
    fn test_as_str_round_trips_through_from_str() {
        for codec in Compression::ALL {
            assert_eq!(codec.as_str().parse::<Compression>(), Ok(codec));
        }
    }

    #[test]
    fn test_unsupported_message() {
        let err = Compression::from_name("lz4").unwrap_err();
        assert!(err.to_string().contains("\"lz4\""));
    }
}
