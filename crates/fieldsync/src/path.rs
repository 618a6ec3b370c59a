//! Hierarchical record paths.
//!
//! Every record the coordinator handles lives at a path shared by the local
//! cache and the remote store, e.g. `checklists/2024/chk-17/loc-3`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Separator between path segments.
pub const SEPARATOR: char = '/';

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("segment pattern is valid"));

/// A validated, slash-separated record path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordPath(String);

impl RecordPath {
    /// Parse a path such as `checklists/2024/abc/loc-1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for empty paths, empty segments, or
    /// segments with characters outside `[A-Za-z0-9_.-]`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::invalid_path(raw, "path is empty"));
        }
        for segment in raw.split(SEPARATOR) {
            check_segment(raw, segment)?;
        }
        Ok(Self(raw.to_string()))
    }

    /// Build a path from individual segments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if any segment is invalid.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let joined = segments.join("/");
        if segments.is_empty() {
            return Err(Error::invalid_path(joined, "path is empty"));
        }
        for segment in &segments {
            check_segment(&joined, segment)?;
        }
        Ok(Self(joined))
    }

    /// `checklists/{year}/{checklist_id}/{location_id}`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if an identifier is not a valid segment.
    pub fn checklist(year: i32, checklist_id: &str, location_id: &str) -> Result<Self> {
        Self::from_segments(["checklists", year.to_string().as_str(), checklist_id, location_id])
    }

    /// `checklists-config/{checklist_id}/questions`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the identifier is not a valid segment.
    pub fn checklist_questions(checklist_id: &str) -> Result<Self> {
        Self::from_segments(["checklists-config", checklist_id, "questions"])
    }

    /// `schedules/{year}/{schedule_id}`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the identifier is not a valid segment.
    pub fn schedule(year: i32, schedule_id: &str) -> Result<Self> {
        Self::from_segments(["schedules", year.to_string().as_str(), schedule_id])
    }

    /// `static-lists/{list_id}`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the identifier is not a valid segment.
    pub fn static_list(list_id: &str) -> Result<Self> {
        Self::from_segments(["static-lists", list_id])
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Check whether this path lies under `prefix` (segment-wise).
    #[must_use]
    pub fn starts_with(&self, prefix: &RecordPath) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0)
                && self.0[prefix.0.len()..].starts_with(SEPARATOR))
    }
}

fn check_segment(raw: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::invalid_path(raw, "empty segment"));
    }
    if segment == "." || segment == ".." {
        return Err(Error::invalid_path(raw, "relative segment"));
    }
    if !SEGMENT.is_match(segment) {
        return Err(Error::invalid_path(
            raw,
            format!("illegal characters in segment '{segment}'"),
        ));
    }
    Ok(())
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for RecordPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RecordPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
