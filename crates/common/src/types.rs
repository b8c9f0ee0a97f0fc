// Core domain types shared across all Civica crates.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returned when a stored string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownEnumValue {
    pub kind: &'static str,
    pub value: String,
}

/// Role of an authenticated portal user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Citizen,
    Admin,
    Mayor,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Admin => "admin",
            Self::Mayor => "mayor",
        }
    }

    /// Parse the database/claim representation of a role.
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "citizen" => Some(Self::Citizen),
            "admin" => Some(Self::Admin),
            "mayor" => Some(Self::Mayor),
            _ => None,
        }
    }
}

impl FromStr for Role {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_db_value(value)
            .ok_or_else(|| UnknownEnumValue { kind: "role", value: value.to_owned() })
    }
}

/// Municipal department a report is routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    RoadService,
    HospitalEmergency,
    WaterManagement,
    ElectricalService,
    General,
}

impl Department {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoadService => "road_service",
            Self::HospitalEmergency => "hospital_emergency",
            Self::WaterManagement => "water_management",
            Self::ElectricalService => "electrical_service",
            Self::General => "general",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "road_service" => Some(Self::RoadService),
            "hospital_emergency" => Some(Self::HospitalEmergency),
            "water_management" => Some(Self::WaterManagement),
            "electrical_service" => Some(Self::ElectricalService),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

impl FromStr for Department {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_db_value(value)
            .ok_or_else(|| UnknownEnumValue { kind: "department", value: value.to_owned() })
    }
}

/// Lifecycle status of a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    InProgress,
    Resolved,
    Rejected,
}

impl ReportStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl FromStr for ReportStatus {
    type Err = UnknownEnumValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_db_value(value)
            .ok_or_else(|| UnknownEnumValue { kind: "report status", value: value.to_owned() })
    }
}

/// Reference to a file already hosted by the external upload service.
///
/// The relay never touches attachment bytes; it stores only these
/// references alongside the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub url: String,
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
}

/// A persisted feedback message in a report's conversation log.
///
/// `created_at` is strictly increasing within one report's log.
/// `read_by` only ever grows; the sender is implicitly a reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackMessage {
    pub id: Uuid,
    pub report_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_role: Role,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<Uuid>,
}

impl FeedbackMessage {
    /// Whether `user_id` has read this message (senders count as readers).
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.read_by.contains(&user_id)
    }
}

/// Read-only view of a report, owned by the external report store.
///
/// The relay consumes this for room authorization and for the
/// status-change notification source; it never mutates reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportView {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub department: Department,
    pub status: ReportStatus,
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A mayor broadcast alert, consumed from the external alert workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub severity: NotificationSeverity,
    pub created_at: DateTime<Utc>,
}

/// Which underlying event stream a notification item came from.
///
/// Priority ordering (alerts first) breaks timestamp ties in the feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    Alert,
    StatusChange,
    Feedback,
}

impl NotificationSource {
    /// Lower value sorts first among equal timestamps.
    pub const fn priority(self) -> u8 {
        match self {
            Self::Alert => 0,
            Self::StatusChange => 1,
            Self::Feedback => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// One entry in a user's notification feed.
///
/// Derived per fetch from the owning stores; never persisted itself.
/// `count` aggregates occurrences of the same source and target, e.g. a
/// report with three unread messages yields one item with `count == 3`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationItem {
    pub id: String,
    pub source: NotificationSource,
    pub severity: NotificationSeverity,
    pub title: String,
    pub message: String,
    pub icon: String,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub count: u64,
}
