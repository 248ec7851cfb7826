//! Instance inventory records.

use serde::{Deserialize, Serialize};

use crate::enums::InstanceStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTimestamps {
    pub creation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop: Option<String>,
}

/// A compute instance as reported by the provider's listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    pub status: InstanceStatus,
    pub zone: String,
    /// Short machine type (`e2-medium`), not the full resource URL
    pub machine_type: String,
    pub timestamps: InstanceTimestamps,
}

/// Flattened listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub name: String,
    pub status: InstanceStatus,
    pub zone: String,
}

impl From<&InstanceRecord> for InstanceSummary {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status,
            zone: record.zone.clone(),
        }
    }
}
