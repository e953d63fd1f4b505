// REST resource types
//
// Only the commonly used fields are modelled; everything else the API
// returns lands in `extra` so nothing is silently dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pagination::{Cursor, ScanPage, ScanResult};

// ── Device ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub services: Vec<DeviceService>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A controllable function of a device, e.g. one socket of a plug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceService {
    pub uuid: Uuid,
    #[serde(default)]
    pub type_uuid: Option<Uuid>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub characteristics: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Changes submitted by `edit_device`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Page of `GET device`.
#[derive(Debug, Deserialize)]
pub struct DeviceResults {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub total_device_count: u64,
}

impl ScanPage for DeviceResults {
    type Entity = Device;

    fn into_scan(self) -> ScanResult<Device> {
        ScanResult {
            entities: self.devices,
            total: self.total_device_count,
            cursor: self.cursor,
        }
    }
}

// ── Group ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub item_count: u32,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Page of `GET group`.
#[derive(Debug, Deserialize)]
pub struct GroupResults {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub total_group_count: u64,
}

impl ScanPage for GroupResults {
    type Entity = Group;

    fn into_scan(self) -> ScanResult<Group> {
        ScanResult {
            entities: self.groups,
            total: self.total_group_count,
            cursor: self.cursor,
        }
    }
}

// ── Control ──────────────────────────────────────────────────────────

/// On/off state of a device service or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub state: bool,
}

// ── Session / User ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "token")]
    pub session_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ── Stored events ────────────────────────────────────────────────────

/// An event as stored by the REST API (distinct from a pushed
/// [`crate::events::Event`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub uuid: Uuid,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub resource_uuid: Option<Uuid>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(rename = "time_created", default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_format: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Page of `GET device/{uuid}/event`.
#[derive(Debug, Deserialize)]
pub struct EventResults {
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub total_event_count: u64,
}

impl ScanPage for EventResults {
    type Entity = EventRecord;

    fn into_scan(self) -> ScanResult<EventRecord> {
        ScanResult {
            entities: self.events,
            total: self.total_event_count,
            cursor: self.cursor,
        }
    }
}
