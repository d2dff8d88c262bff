//! Per-tick samples and once-per-session static info.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::reading::{Fields, Reading};

/// One tick's worth of readings, keyed by subsystem name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix nanoseconds at the start of collection.
    pub timestamp: i64,
    pub sections: BTreeMap<String, Reading>,
}

impl Sample {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            sections: BTreeMap::new(),
        }
    }

    pub fn section(&self, name: &str) -> Option<&Reading> {
        self.sections.get(name)
    }
}

/// Host and hardware facts captured once at session start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticInfo {
    pub session_id: String,
    pub timestamp: i64,
    pub hostname: String,
    pub kernel: String,
    pub boot_time: i64,
    pub sections: BTreeMap<String, Fields>,
}
