use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// One entry of the management API's connection list.
///
/// Only `name` and `user` are interpreted; every other field the broker
/// reports is kept verbatim in `extra`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    pub name: Option<String>,
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ConnectionRecord {
    pub fn user_contains(&self, needle: &str) -> bool {
        self.user.as_deref().is_some_and(|user| user.contains(needle))
    }
}

/// Outcome of closing every connection that matched a user name.
///
/// Each close is attempted independently; failures are collected rather than
/// stopping the run.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: Vec<String>,
    pub failed: Vec<(String, crate::utils::RouterError)>,
}

impl CloseReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.closed.len() + self.failed.len()
    }
}
