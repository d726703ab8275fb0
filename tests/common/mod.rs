//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod nodes;

use slotflow::data::DataTable;
use std::time::Duration;

/// Upper bound for waiting on a run in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Text payloads of a table, in row order
pub fn texts(table: &DataTable) -> Vec<String> {
    table
        .rows()
        .map(|row| match row.item.to_json() {
            Some(serde_json::Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => row.item.display(),
        })
        .collect()
}
