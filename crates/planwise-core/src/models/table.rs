//! Table registry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The entity tables the sync core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableName {
    Tasks,
    Categories,
    Projects,
    Events,
}

impl TableName {
    /// Every registered table, in reconciliation order.
    pub const ALL: [Self; 4] = [Self::Tasks, Self::Categories, Self::Projects, Self::Events];

    /// Remote table name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Categories => "categories",
            Self::Projects => "projects",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|table| table.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown table: {s}")))
    }
}
