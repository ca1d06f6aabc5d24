//! Read-only view of an event used to scope permissions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::identity::MemberId;

/// Numeric primary key of an event.
pub type EventId = i64;

static NEXT_DRAFT_ID: AtomicI64 = AtomicI64::new(1);

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Approved,
}

impl EventStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// Whether the event accepts applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Open,
    Closed,
}

impl ApplicationStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Status of a single participant application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl ParticipantStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Kind of event; decides which admin tier may approve it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Statutory,
    NonStatutory,
    Su,
    Local,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Statutory => "statutory",
            Self::NonStatutory => "non-statutory",
            Self::Su => "su",
            Self::Local => "local",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "statutory" => Self::Statutory,
            "non-statutory" => Self::NonStatutory,
            "su" => Self::Su,
            "local" => Self::Local,
            _ => Self::Other(raw),
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member listed as organizer, or an antenna listed as organizing local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignRef {
    pub foreign_id: MemberId,
}

impl ForeignRef {
    pub fn new(foreign_id: impl Into<MemberId>) -> Self {
        Self {
            foreign_id: foreign_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationEntry {
    pub foreign_id: MemberId,
    #[serde(default)]
    pub application_status: ParticipantStatus,
}

impl ApplicationEntry {
    pub fn new(foreign_id: impl Into<MemberId>, application_status: ParticipantStatus) -> Self {
        Self {
            foreign_id: foreign_id.into(),
            application_status,
        }
    }
}

/// Snapshot of an event's lifecycle and membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub id: EventId,

    /// Human-readable identifier
    pub slug: String,

    #[serde(default)]
    pub name: String,

    pub status: EventStatus,

    #[serde(default)]
    pub deleted: bool,

    pub application_status: ApplicationStatus,

    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default)]
    pub organizers: Vec<ForeignRef>,

    #[serde(default)]
    pub organizing_locals: Vec<ForeignRef>,

    /// In submission order; permission checks use the first match.
    #[serde(default)]
    pub applications: Vec<ApplicationEntry>,
}

impl EventSnapshot {
    /// A fresh draft event with applications closed and no members.
    ///
    /// Ids are handed out from a process-wide counter; use
    /// [`EventSnapshot::with_id`] to pin one.
    pub fn draft(slug: impl Into<String>, event_type: EventType) -> Self {
        let slug = slug.into();
        Self {
            id: NEXT_DRAFT_ID.fetch_add(1, Ordering::Relaxed),
            name: slug.clone(),
            slug,
            status: EventStatus::Draft,
            deleted: false,
            application_status: ApplicationStatus::Closed,
            event_type,
            organizers: Vec::new(),
            organizing_locals: Vec::new(),
            applications: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_application_status(mut self, status: ApplicationStatus) -> Self {
        self.application_status = status;
        self
    }

    pub fn with_organizer(mut self, member: impl Into<MemberId>) -> Self {
        self.organizers.push(ForeignRef::new(member));
        self
    }

    pub fn with_organizing_local(mut self, antenna: impl Into<MemberId>) -> Self {
        self.organizing_locals.push(ForeignRef::new(antenna));
        self
    }

    pub fn with_application(mut self, member: impl Into<MemberId>, status: ParticipantStatus) -> Self {
        self.applications.push(ApplicationEntry::new(member, status));
        self
    }

    pub fn is_organizer(&self, member: &MemberId) -> bool {
        self.organizers.iter().any(|o| &o.foreign_id == member)
    }

    pub fn is_organizing_local(&self, antenna: &MemberId) -> bool {
        self.organizing_locals.iter().any(|l| &l.foreign_id == antenna)
    }

    /// The first application submitted by `member`, if any.
    pub fn application_of(&self, member: &MemberId) -> Option<&ApplicationEntry> {
        self.applications.iter().find(|a| &a.foreign_id == member)
    }
}
