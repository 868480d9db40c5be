//! TAI timestamps
//!
//! NMOS version stamps and grain timestamps are expressed in International
//! Atomic Time as `"<seconds>:<nanoseconds>"` strings. This module provides
//! the `Tai` type used for resource `created`/`updated` stamps and grain
//! timestamps, plus the coarser `Health` seconds used by the heartbeat
//! machinery.
//!
//! # Ordering
//!
//! `Tai` is totally ordered (seconds, then nanoseconds). The registry relies
//! on this to keep its updated index strictly increasing: see
//! `strictly_increasing_update` in the store, which takes
//! `max(now, latest + 1ns)` via [`Tai::successor`].
//!
//! # Wire format
//!
//! Serialized as the string form, e.g. `"1470847395:120000000"`. Both fields
//! are base-10 with no padding.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Offset between Unix time and TAI, in seconds
///
/// TAI is ahead of UTC by the accumulated leap seconds (37 since 2017).
/// Only the wire convention cares; ordering is unaffected.
const TAI_UTC_OFFSET_SECS: u64 = 37;

/// Health is measured in whole TAI seconds
pub type Health = u64;

/// Health value that never expires (used for subscriptions and the
/// registry's own resources)
pub const HEALTH_FOREVER: Health = Health::MAX;

/// A TAI timestamp with nanosecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tai {
    /// Whole seconds since the TAI epoch
    pub seconds: u64,
    /// Nanoseconds within the second (0..1_000_000_000)
    pub nanoseconds: u32,
}

impl Tai {
    /// Construct from seconds and nanoseconds
    pub fn new(seconds: u64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// The current TAI time
    pub fn now() -> Self {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: unix.as_secs() + TAI_UTC_OFFSET_SECS,
            nanoseconds: unix.subsec_nanos(),
        }
    }

    /// The smallest timestamp strictly greater than this one (+1 ns)
    pub fn successor(self) -> Self {
        if self.nanoseconds + 1 < 1_000_000_000 {
            Self {
                seconds: self.seconds,
                nanoseconds: self.nanoseconds + 1,
            }
        } else {
            Self {
                seconds: self.seconds + 1,
                nanoseconds: 0,
            }
        }
    }

    /// Whole seconds, as used by the health machinery
    pub fn health(self) -> Health {
        self.seconds
    }
}

/// The current health value (TAI seconds)
pub fn health_now() -> Health {
    Tai::now().seconds
}

impl fmt::Display for Tai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.seconds, self.nanoseconds)
    }
}

impl FromStr for Tai {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sec, nsec) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid TAI timestamp: {}", s))?;
        let seconds = sec
            .parse::<u64>()
            .map_err(|e| format!("invalid TAI seconds: {}", e))?;
        let nanoseconds = nsec
            .parse::<u32>()
            .map_err(|e| format!("invalid TAI nanoseconds: {}", e))?;
        if nanoseconds >= 1_000_000_000 {
            return Err(format!("TAI nanoseconds out of range: {}", nanoseconds));
        }
        Ok(Self {
            seconds,
            nanoseconds,
        })
    }
}

impl Serialize for Tai {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Tai {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
