// src/data.rs

//! Process-scoped key/value store shared by the scheduler and its tasks.
//!
//! Values are held as `serde_json::Value`. Every read returns an owned copy and
//! every write stores an owned copy, so a caller mutating what it got back can
//! never change what is stored (and vice versa).
//!
//! Keys are normalized: each run of non-word characters becomes a single `_`,
//! so `"account info"`, `"account-info"` and `"account_info"` address the
//! same slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::errors::Result;

/// Key under which the scheduler stores the configured account.
pub const DATA_KEY_ACCOUNT_INFO: &str = "account_info";

/// Account credentials made available to tasks through the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AccountInfo {
    pub account: String,
    pub username: String,
    pub password: String,
}

impl AccountInfo {
    pub fn new(account: &str, username: &str, password: &str) -> Self {
        Self {
            account: account.trim().to_string(),
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        }
    }
}

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w]+").expect("static key pattern"))
}

/// Normalize a store key (non-word runs collapse to `_`).
pub fn normalize_key(key: &str) -> String {
    non_word().replace_all(key, "_").into_owned()
}

/// Shared handle to the store. Clones point at the same data.
#[derive(Debug, Clone, Default)]
pub struct DataStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raw lookup. Missing keys read as an empty JSON object.
    pub fn get_value(&self, key: &str) -> Value {
        let key = normalize_key(key);
        self.lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Raw write of an owned copy of `value`.
    pub fn set_value(&self, key: &str, value: &Value) {
        let key = normalize_key(key);
        trace!(key = %key, "data store write");
        self.lock().insert(key, value.clone());
    }

    /// Typed lookup. A missing key deserializes from `{}`, so types whose
    /// fields all have defaults come back as their default.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get_value(key);
        Ok(serde_json::from_value(value)?)
    }

    /// Typed write. The value is serialized, which also detaches it from the
    /// caller's instance.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let key = normalize_key(key);
        trace!(key = %key, "data store write");
        self.lock().insert(key, value);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(&normalize_key(key))
    }
}
