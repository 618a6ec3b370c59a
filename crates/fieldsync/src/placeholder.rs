//! Resolution of pending-upload placeholders.
//!
//! An upload queued while offline hands the caller a placeholder such as
//! `pending-upload://<id>`, which then ends up inside saved records. Once the
//! upload succeeds, the placeholder is mapped to the real URL here. The map
//! is persisted so writes queued before a restart still get their
//! placeholders replaced when they are finally applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::operation::is_placeholder;
use crate::storage::Storage;

/// Storage key holding the placeholder → URL map.
pub const RESOLVED_PLACEHOLDERS_KEY: &str = "sync:resolved_placeholders";

/// Placeholders whose uploads have completed, with their remote URLs.
#[derive(Debug)]
pub struct ResolvedPlaceholders {
    storage: Arc<Storage>,
    map: BTreeMap<String, String>,
}

impl ResolvedPlaceholders {
    /// Load the persisted map. An unreadable map starts empty.
    #[must_use]
    pub fn load(storage: Arc<Storage>) -> Self {
        let map = match storage.get(RESOLVED_PLACEHOLDERS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "resolved placeholder map is malformed, starting empty");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "cannot read resolved placeholder map");
                BTreeMap::new()
            }
        };
        Self { storage, map }
    }

    /// Record that `placeholder` now stands for `url`.
    pub fn resolve(&mut self, placeholder: &str, url: &str) {
        self.map.insert(placeholder.to_string(), url.to_string());
        self.save();
        debug!(placeholder, url, "placeholder resolved");
    }

    /// The URL a placeholder resolved to, if any.
    #[must_use]
    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.map.get(placeholder).map(String::as_str)
    }

    /// Replace every resolved placeholder inside `value`.
    ///
    /// Returns `true` if anything was replaced.
    pub fn substitute(&self, value: &mut Value) -> bool {
        if self.map.is_empty() {
            return false;
        }
        replace_strings(value, &|s| self.get(s))
    }

    /// Forget every resolution.
    ///
    /// Only safe once no queued operation can still reference a placeholder.
    pub fn prune(&mut self) {
        if self.map.is_empty() {
            return;
        }
        self.map.clear();
        if let Err(e) = self.storage.remove(RESOLVED_PLACEHOLDERS_KEY) {
            warn!(error = %e, "cannot prune resolved placeholder map");
        }
    }

    /// Number of resolved placeholders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check whether no placeholder has been resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn save(&self) {
        let raw = match serde_json::to_string(&self.map) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "cannot serialize resolved placeholder map");
                return;
            }
        };
        if let Err(e) = self.storage.put(RESOLVED_PLACEHOLDERS_KEY, &raw) {
            warn!(error = %e, "cannot persist resolved placeholder map");
        }
    }
}

/// Replace one placeholder with `url` everywhere inside `value`.
///
/// Returns `true` if anything was replaced.
pub fn replace_placeholder(value: &mut Value, placeholder: &str, url: &str) -> bool {
    replace_strings(value, &|s| (s == placeholder).then_some(url))
}

/// Walk `value` and swap every placeholder string `lookup` knows about.
fn replace_strings<'a>(value: &mut Value, lookup: &dyn Fn(&str) -> Option<&'a str>) -> bool {
    match value {
        Value::String(s) if is_placeholder(s.as_str()) => match lookup(s.as_str()) {
            Some(url) => {
                *s = url.to_string();
                true
            }
            None => false,
        },
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| replace_strings(item, lookup) | changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, item| replace_strings(item, lookup) | changed),
        _ => false,
    }
}
