//! Registry settings
//!
//! Settings arrive as a JSON object (on the command line in the original
//! deployment, or by POST to the Settings API) and omitted keys assume
//! their defaults. The struct below recognizes exactly the documented keys;
//! unknown keys are rejected so a typo'd POST fails loudly instead of
//! silently doing nothing.

use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All recognized settings, with their defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Log verbosity; more negative is more verbose
    pub logging_level: i32,
    /// Accept registrations whose parent is not (yet) registered
    pub allow_invalid_resources: bool,
    pub host_name: String,
    pub host_address: String,
    pub query_port: u16,
    pub query_ws_port: u16,
    pub registration_port: u16,
    pub node_port: u16,
    pub connection_port: u16,
    pub admin_port: u16,
    pub settings_port: u16,
    pub logging_port: u16,
    pub mdns_port: u16,
    /// Garbage-collection window for heartbeats, in seconds
    pub registration_expiry_interval: u64,
    /// Priority advertised in the `pri` mDNS TXT record
    pub pri: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging_level: 0,
            allow_invalid_resources: false,
            host_name: "localhost".to_string(),
            host_address: "127.0.0.1".to_string(),
            query_port: 3211,
            query_ws_port: 3213,
            registration_port: 3210,
            node_port: 3212,
            connection_port: 3215,
            admin_port: 3208,
            settings_port: 3209,
            logging_port: 5106,
            mdns_port: 3214,
            registration_expiry_interval: 12,
            pri: 100,
        }
    }
}

impl Settings {
    /// Parse settings from a JSON object, applying defaults for omitted keys
    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| ApiError::MalformedRequest(format!("bad settings: {}", e)))
    }

    /// Merge a JSON object of settings into this one
    ///
    /// Keys present in `patch` replace the current values; everything else
    /// is untouched. Unknown keys fail the whole merge.
    pub fn merge(&mut self, patch: &Value) -> Result<()> {
        let obj = patch
            .as_object()
            .ok_or_else(|| ApiError::MalformedRequest("settings must be an object".to_string()))?;
        let mut merged = serde_json::to_value(&*self)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        for (key, value) in obj {
            merged[key.as_str()] = value.clone();
        }
        *self = Self::from_json(&merged)?;
        Ok(())
    }

    /// The settings as a JSON object (what `GET /settings/all` returns)
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.query_port, 3211);
        assert_eq!(s.query_ws_port, 3213);
        assert_eq!(s.registration_port, 3210);
        assert_eq!(s.registration_expiry_interval, 12);
        assert!(!s.allow_invalid_resources);
    }

    #[test]
    fn test_from_json_partial() {
        let s = Settings::from_json(&json!({"logging_level": -40})).unwrap();
        assert_eq!(s.logging_level, -40);
        assert_eq!(s.query_port, 3211);
    }

    #[test]
    fn test_merge_overrides() {
        let mut s = Settings::default();
        s.merge(&json!({"registration_expiry_interval": 1, "host_name": "reg01"}))
            .unwrap();
        assert_eq!(s.registration_expiry_interval, 1);
        assert_eq!(s.host_name, "reg01");
        assert_eq!(s.node_port, 3212);
    }

    #[test]
    fn test_merge_rejects_unknown_key() {
        let mut s = Settings::default();
        assert!(s.merge(&json!({"no_such_setting": true})).is_err());
    }

    #[test]
    fn test_merge_rejects_non_object() {
        let mut s = Settings::default();
        assert!(s.merge(&json!([1, 2, 3])).is_err());
    }
}
