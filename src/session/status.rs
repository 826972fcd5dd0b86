//! Handshake status values and the per-party store record.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskInfo;

/// The handshake status a party publishes in its half of the store.
///
/// A round is negotiated purely through these values: the sender writes
/// PUSH, the receiver answers PULL, and both return to ZOMBIE once the
/// bulk transfer completed. OFFLINE is terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[display(fmt = "PUSH")]
    Push,
    #[display(fmt = "PULL")]
    Pull,
    #[display(fmt = "ZOMBIE")]
    Zombie,
    #[display(fmt = "OFFLINE")]
    Offline,
}

impl Status {
    /// The status the other party is expected to show for this one to
    /// make sense in a round: PUSH pairs with PULL.
    pub fn counterpart(self) -> Status {
        match self {
            Status::Push => Status::Pull,
            Status::Pull => Status::Push,
            other => other,
        }
    }
}

/// The JSON object a party keeps under its half-key of the store.
///
/// Collector output lands in `extra`; `status` and `task_info` are
/// reserved and cannot be shadowed by collectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: Status,
    #[serde(default)]
    pub task_info: TaskInfo,
    pub upload_version: i64,
    pub download_version: i64,
    #[serde(default)]
    pub nick_name: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StatusRecord {
    /// The record a party writes at session construction, before any
    /// round: ZOMBIE with unset versions.
    pub fn initial(nick_name: impl Into<String>) -> Self {
        Self {
            status: Status::Zombie,
            task_info: TaskInfo::new(),
            upload_version: -1,
            download_version: -1,
            nick_name: nick_name.into(),
            timestamp: 0.0,
            extra: BTreeMap::new(),
        }
    }
}
