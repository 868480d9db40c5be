//! NMOS API versions
//!
//! IS-04 APIs are versioned `v<major>.<minor>` in the URL path. The registry
//! advertises v1.0 through v1.2 for the Node, Query and Registration APIs
//! and v1.0 for the Connection API. Resources registered at a newer version
//! can be served at an older one by field omission ("downgrade"); the
//! per-version field tables live in the registry crate.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An NMOS API version, e.g. `v1.2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

/// IS-04 v1.0
pub const V1_0: ApiVersion = ApiVersion { major: 1, minor: 0 };
/// IS-04 v1.1
pub const V1_1: ApiVersion = ApiVersion { major: 1, minor: 1 };
/// IS-04 v1.2
pub const V1_2: ApiVersion = ApiVersion { major: 1, minor: 2 };

/// The IS-04 versions this registry serves, oldest first
pub const IS04_VERSIONS: [ApiVersion; 3] = [V1_0, V1_1, V1_2];

/// The IS-05 versions this registry serves
pub const IS05_VERSIONS: [ApiVersion; 1] = [V1_0];

impl ApiVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('v')
            .ok_or_else(|| format!("invalid API version: {}", s))?;
        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| format!("invalid API version: {}", s))?;
        Ok(Self {
            major: major
                .parse()
                .map_err(|e| format!("invalid API version: {}", e))?,
            minor: minor
                .parse()
                .map_err(|e| format!("invalid API version: {}", e))?,
        })
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
