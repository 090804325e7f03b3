//! Header field accumulation

use std::collections::HashMap;

/// Values for a fixed set of required header keys.
///
/// Complete once every required key has a value. Keys outside the required
/// set are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderState {
    required: Vec<String>,
    values: HashMap<String, String>,
}

impl HeaderState {
    /// Create with the required key set, all absent
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            values: HashMap::new(),
        }
    }

    /// Record a header line. Returns false for keys outside the required set.
    pub fn record(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim();
        if !self.required.iter().any(|k| k == key) {
            return false;
        }
        self.values.insert(key.to_string(), value.trim().to_string());
        true
    }

    /// Value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// True when every required key has a value
    pub fn is_complete(&self) -> bool {
        self.required.iter().all(|k| self.values.contains_key(k))
    }

    /// Required keys still without a value, in configured order
    pub fn missing(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|k| !self.values.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Required keys in configured order
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Recorded `(key, value)` pairs in required-key order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.required
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v.as_str())))
    }
}

/// `"Source File"` -> `"source_file"`
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for word in key.split(|c: char| !c.is_ascii_alphanumeric()).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(&word.to_ascii_lowercase());
    }
    out
}
