//! Awkward (ragged) structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structure of an awkward array: the form IR, the outer length, and the
/// size of each named buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AwkwardStructure {
    /// The form, an opaque JSON IR interpreted by awkward-aware clients.
    pub form: serde_json::Value,
    pub length: u64,
    /// Buffer name to size in bytes.
    pub buffer_sizes: BTreeMap<String, u64>,
}

impl AwkwardStructure {
    pub fn buffer_names(&self) -> impl Iterator<Item = &str> {
        self.buffer_sizes.keys().map(String::as_str)
    }

    pub fn total_byte_size(&self) -> u64 {
        self.buffer_sizes.values().sum()
    }
}
