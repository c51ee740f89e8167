//! User settings with merge-patch updates.
//!
//! Known fields are typed; everything else lives in an extension bag and is
//! stored verbatim. A patch is deep-merged into the current settings:
//! objects merge key by key, any other value replaces, and `null` removes
//! the key (a removed known field falls back to its default).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use satchel_types::Denomination;

use crate::SessionError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Display unit for amounts.
    pub unit: Denomination,
    /// Confirmation target used to pick the default fee tier.
    pub required_num_blocks: u32,
    /// Idle minutes before the wallet locks itself.
    pub altimeout: u32,
    pub pricing: Pricing,
    pub notifications: NotificationSettings,
    /// Signal replaceability on new transactions.
    pub rbf: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub currency: String,
    pub exchange: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub email_incoming: bool,
    pub email_outgoing: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unit: Denomination::Btc,
            required_num_blocks: 12,
            altimeout: 5,
            pricing: Pricing::default(),
            notifications: NotificationSettings::default(),
            rbf: true,
            extra: Map::new(),
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            exchange: "BITSTAMP".to_string(),
        }
    }
}

/// Owns the current settings and applies patches to them.
#[derive(Clone, Debug, Default)]
pub struct SettingsStore {
    settings: Settings,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Merge `patch` and return the new settings. On error nothing changes.
    pub fn change(&mut self, patch: &Value) -> Result<Settings, SessionError> {
        if !patch.is_object() {
            return Err(SessionError::InvalidSettings(
                "settings patch must be an object".to_string(),
            ));
        }
        let mut merged = serde_json::to_value(&self.settings)
            .map_err(|e| SessionError::InvalidSettings(e.to_string()))?;
        merge_patch(&mut merged, patch);
        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| SessionError::InvalidSettings(e.to_string()))?;
        self.settings = settings.clone();
        Ok(settings)
    }
}

/// Deep-merge `patch` into `target`.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untouched_keys_are_preserved() {
        let mut store = SettingsStore::default();
        let settings = store.change(&json!({"altimeout": 10})).unwrap();
        assert_eq!(settings.altimeout, 10);
        assert_eq!(settings.required_num_blocks, 12);
        assert_eq!(settings.pricing, Pricing::default());
    }

    #[test]
    fn nested_objects_merge_key_by_key() {
        let mut store = SettingsStore::default();
        store
            .change(&json!({"notifications": {"email_incoming": true}}))
            .unwrap();
        let settings = store
            .change(&json!({"notifications": {"email_outgoing": true}, "pricing": {"currency": "EUR"}}))
            .unwrap();
        assert!(settings.notifications.email_incoming);
        assert!(settings.notifications.email_outgoing);
        assert_eq!(settings.pricing.currency, "EUR");
        assert_eq!(settings.pricing.exchange, "BITSTAMP");
    }

    #[test]
    fn unknown_keys_are_stored_verbatim() {
        let mut store = SettingsStore::default();
        let settings = store
            .change(&json!({"custom": {"nested": [1, 2, 3]}, "sound": false}))
            .unwrap();
        assert_eq!(settings.extra["custom"], json!({"nested": [1, 2, 3]}));
        assert_eq!(settings.extra["sound"], json!(false));

        let round_trip = serde_json::to_value(&settings).unwrap();
        assert_eq!(round_trip["custom"]["nested"], json!([1, 2, 3]));
    }

    #[test]
    fn null_removes_extension_key() {
        let mut store = SettingsStore::default();
        store.change(&json!({"custom": 1, "other": 2})).unwrap();
        let settings = store.change(&json!({"custom": null})).unwrap();
        assert!(!settings.extra.contains_key("custom"));
        assert_eq!(settings.extra["other"], json!(2));
    }

    #[test]
    fn null_resets_known_field() {
        let mut store = SettingsStore::default();
        store.change(&json!({"rbf": false})).unwrap();
        let settings = store.change(&json!({"rbf": null})).unwrap();
        assert!(settings.rbf);
    }

    #[test]
    fn invalid_patch_changes_nothing() {
        let mut store = SettingsStore::default();
        assert!(store.change(&json!([1, 2])).is_err());
        assert!(store.change(&json!({"altimeout": "soon"})).is_err());
        assert_eq!(store.get(), &Settings::default());
    }

    #[test]
    fn merge_patch_replaces_non_objects() {
        let mut target = json!({"a": [1, 2], "b": {"c": 1}});
        merge_patch(&mut target, &json!({"a": [3], "b": 7}));
        assert_eq!(target, json!({"a": [3], "b": 7}));
    }
}
