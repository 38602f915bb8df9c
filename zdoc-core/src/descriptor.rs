//! Document descriptors
//!
//! A descriptor is the Index's record for one logical document: which blob
//! holds its committed content, when it was last mutated, and whether it is
//! live or tombstoned. The same shape describes the server's view of a
//! document; the two are compared by value during reconciliation.

use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::index::IndexRecord;
use crate::object::ContentHash;

/// Wire format used by the server and the index file
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Second-precision local timestamp of the last mutation.
///
/// Used for last-writer-wins ordering only; it carries no causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateTime(NaiveDateTime);

impl UpdateTime {
    /// Current local time, truncated to whole seconds
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self(now.with_nanosecond(0).unwrap_or(now))
    }

    /// Parse `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare date
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        NaiveDateTime::parse_from_str(s, TIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(Self)
    }

    /// Current time, or one second past `previous` if the clock has not
    /// moved beyond it. A local mutation always orders after the state it
    /// replaces.
    pub fn now_after(previous: Option<&UpdateTime>) -> Self {
        let now = Self::now();
        match previous {
            Some(prev) if !now.is_newer_than(prev) => Self(prev.0 + TimeDelta::seconds(1)),
            _ => now,
        }
    }

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self(dt.with_nanosecond(0).unwrap_or(dt))
    }

    pub fn is_newer_than(&self, other: &UpdateTime) -> bool {
        self.0 > other.0
    }
}

impl std::fmt::Display for UpdateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(TIME_FORMAT))
    }
}

impl Serialize for UpdateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UpdateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UpdateTime::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid update time: {:?}", raw)))
    }
}

/// Lifecycle of a document. Deleted variants are tombstones: they stay in
/// the Index so the deletion can propagate to other replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DocStatus {
    #[default]
    Active,
    UserDeleted,
    AdminDeleted,
}

impl DocStatus {
    pub fn is_deleted(self) -> bool {
        !matches!(self, DocStatus::Active)
    }

    /// Map the server's status code. Only the two deletion codes carry
    /// meaning for the client; every other value is a live document.
    pub fn from_wire(code: &str) -> Self {
        match code.trim() {
            "-2" => DocStatus::UserDeleted,
            "-3" => DocStatus::AdminDeleted,
            _ => DocStatus::Active,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocStatus::Active => "active",
            DocStatus::UserDeleted => "user_deleted",
            DocStatus::AdminDeleted => "admin_deleted",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "active" => DocStatus::Active,
            "user_deleted" => DocStatus::UserDeleted,
            "admin_deleted" => DocStatus::AdminDeleted,
            other => DocStatus::from_wire(other),
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DocStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DocStatus::parse(&raw))
    }
}

/// Index record for one article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Working-directory file name, unique key
    #[serde(rename = "file_name")]
    pub name: String,
    /// Object-store key of the committed content
    #[serde(rename = "file_md5")]
    pub content_hash: ContentHash,
    pub update_time: UpdateTime,
    #[serde(default)]
    pub status: DocStatus,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, content_hash: ContentHash, update_time: UpdateTime) -> Self {
        Self {
            name: name.into(),
            content_hash,
            update_time,
            status: DocStatus::Active,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.status.is_deleted()
    }

    /// Same content and same lifecycle state, regardless of timestamps
    pub fn same_state(&self, other: &Descriptor) -> bool {
        self.content_hash == other.content_hash && self.status == other.status
    }
}

impl IndexRecord for Descriptor {
    fn key(&self) -> &str {
        &self.name
    }

    fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    fn is_tombstone(&self) -> bool {
        self.status.is_deleted()
    }
}
