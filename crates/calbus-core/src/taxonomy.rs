//! Closed catalog of system event codes.
//!
//! Every code carries static metadata (severity, privilege, and the
//! `indexable` / `notifiable` / `collection_ref` flags) through an exhaustive
//! `match`, so a code cannot exist without its metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Severity of a system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Severe,
    Fatal,
}

/// Who may observe an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Only administrators and system components.
    Privileged,
    /// May be surfaced to ordinary users.
    UserVisible,
}

/// Static metadata attached to an event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeInfo {
    pub severity: Severity,
    pub privilege: Privilege,
    /// The event may require a search-index update.
    pub indexable: bool,
    /// The event may require a recipient notification.
    pub notifiable: bool,
    /// The event href names a collection rather than a leaf entity.
    pub collection_ref: bool,
}

impl CodeInfo {
    const fn new(
        severity: Severity,
        privilege: Privilege,
        indexable: bool,
        notifiable: bool,
        collection_ref: bool,
    ) -> Self {
        Self {
            severity,
            privilege,
            indexable,
            notifiable,
            collection_ref,
        }
    }
}

/// System event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SysCode {
    // Service lifecycle
    ServiceStarted,
    ServiceStopped,

    // Timing
    TimedHttp,
    HttpStats,

    // Principals
    NewUser,
    NewGroup,
    PrincipalDeleted,

    // Collections
    CollectionAdded,
    CollectionUpdated,
    CollectionMoved,
    CollectionDeleted,
    CollectionTombstoned,

    // Entities
    EntityAdded,
    EntityUpdated,
    EntityMoved,
    EntityDeleted,
    EntityTombstoned,
    EntityFetched,

    // Scheduling
    ScheduleQueued,
    ScheduleUpdate,

    // Notifications
    NotificationAdded,

    // Indexing
    ReindexEvent,
}

impl SysCode {
    /// Every code in the catalog.
    pub const ALL: [SysCode; 22] = [
        SysCode::ServiceStarted,
        SysCode::ServiceStopped,
        SysCode::TimedHttp,
        SysCode::HttpStats,
        SysCode::NewUser,
        SysCode::NewGroup,
        SysCode::PrincipalDeleted,
        SysCode::CollectionAdded,
        SysCode::CollectionUpdated,
        SysCode::CollectionMoved,
        SysCode::CollectionDeleted,
        SysCode::CollectionTombstoned,
        SysCode::EntityAdded,
        SysCode::EntityUpdated,
        SysCode::EntityMoved,
        SysCode::EntityDeleted,
        SysCode::EntityTombstoned,
        SysCode::EntityFetched,
        SysCode::ScheduleQueued,
        SysCode::ScheduleUpdate,
        SysCode::NotificationAdded,
        SysCode::ReindexEvent,
    ];

    /// Static metadata for this code.
    pub const fn info(self) -> CodeInfo {
        match self {
            SysCode::ServiceStarted | SysCode::ServiceStopped => {
                CodeInfo::new(Severity::Info, Privilege::Privileged, false, false, false)
            }
            SysCode::TimedHttp | SysCode::HttpStats => {
                CodeInfo::new(Severity::Debug, Privilege::Privileged, false, false, false)
            }
            SysCode::NewUser | SysCode::NewGroup => {
                CodeInfo::new(Severity::Info, Privilege::Privileged, true, false, false)
            }
            SysCode::PrincipalDeleted => {
                CodeInfo::new(Severity::Warn, Privilege::Privileged, true, false, false)
            }
            SysCode::CollectionAdded
            | SysCode::CollectionUpdated
            | SysCode::CollectionMoved
            | SysCode::CollectionDeleted
            | SysCode::CollectionTombstoned => {
                CodeInfo::new(Severity::Info, Privilege::UserVisible, true, true, true)
            }
            SysCode::EntityAdded
            | SysCode::EntityUpdated
            | SysCode::EntityMoved
            | SysCode::EntityDeleted
            | SysCode::EntityTombstoned => {
                CodeInfo::new(Severity::Info, Privilege::UserVisible, true, true, false)
            }
            SysCode::EntityFetched => {
                CodeInfo::new(Severity::Trace, Privilege::UserVisible, false, false, false)
            }
            SysCode::ScheduleQueued | SysCode::ScheduleUpdate => {
                CodeInfo::new(Severity::Info, Privilege::UserVisible, false, false, false)
            }
            SysCode::NotificationAdded => {
                CodeInfo::new(Severity::Info, Privilege::UserVisible, false, false, false)
            }
            SysCode::ReindexEvent => {
                CodeInfo::new(Severity::Info, Privilege::Privileged, true, false, false)
            }
        }
    }

    pub const fn severity(self) -> Severity {
        self.info().severity
    }

    pub const fn privilege(self) -> Privilege {
        self.info().privilege
    }

    pub const fn is_indexable(self) -> bool {
        self.info().indexable
    }

    pub const fn is_notifiable(self) -> bool {
        self.info().notifiable
    }

    pub const fn is_collection_ref(self) -> bool {
        self.info().collection_ref
    }

    /// Timing-only codes are routed to the monitor channel and nowhere else.
    pub const fn is_timing(self) -> bool {
        matches!(self, SysCode::TimedHttp | SysCode::HttpStats)
    }

    /// Codes describing a move, whose sharing state is taken from the source.
    pub const fn is_move(self) -> bool {
        matches!(self, SysCode::EntityMoved | SysCode::CollectionMoved)
    }

    /// Wire identifier carried in the `syscode` attribute.
    pub const fn as_str(self) -> &'static str {
        match self {
            SysCode::ServiceStarted => "SERVICE_STARTED",
            SysCode::ServiceStopped => "SERVICE_STOPPED",
            SysCode::TimedHttp => "TIMED_HTTP",
            SysCode::HttpStats => "HTTP_STATS",
            SysCode::NewUser => "NEW_USER",
            SysCode::NewGroup => "NEW_GROUP",
            SysCode::PrincipalDeleted => "PRINCIPAL_DELETED",
            SysCode::CollectionAdded => "COLLECTION_ADDED",
            SysCode::CollectionUpdated => "COLLECTION_UPDATED",
            SysCode::CollectionMoved => "COLLECTION_MOVED",
            SysCode::CollectionDeleted => "COLLECTION_DELETED",
            SysCode::CollectionTombstoned => "COLLECTION_TOMBSTONED",
            SysCode::EntityAdded => "ENTITY_ADDED",
            SysCode::EntityUpdated => "ENTITY_UPDATED",
            SysCode::EntityMoved => "ENTITY_MOVED",
            SysCode::EntityDeleted => "ENTITY_DELETED",
            SysCode::EntityTombstoned => "ENTITY_TOMBSTONED",
            SysCode::EntityFetched => "ENTITY_FETCHED",
            SysCode::ScheduleQueued => "SCHEDULE_QUEUED",
            SysCode::ScheduleUpdate => "SCHEDULE_UPDATE",
            SysCode::NotificationAdded => "NOTIFICATION_ADDED",
            SysCode::ReindexEvent => "REINDEX_EVENT",
        }
    }
}

impl fmt::Display for SysCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SysCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SysCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown syscode: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_round_trip_through_from_str() {
        for code in SysCode::ALL {
            assert_eq!(code.as_str().parse::<SysCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_identifiers_match_serde_names() {
        for code in SysCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    /// Catalog position of each code. Adding a variant fails to compile
    /// here until it is given a place in `SysCode::ALL`.
    fn catalog_index(code: SysCode) -> usize {
        match code {
            SysCode::ServiceStarted => 0,
            SysCode::ServiceStopped => 1,
            SysCode::TimedHttp => 2,
            SysCode::HttpStats => 3,
            SysCode::NewUser => 4,
            SysCode::NewGroup => 5,
            SysCode::PrincipalDeleted => 6,
            SysCode::CollectionAdded => 7,
            SysCode::CollectionUpdated => 8,
            SysCode::CollectionMoved => 9,
            SysCode::CollectionDeleted => 10,
            SysCode::CollectionTombstoned => 11,
            SysCode::EntityAdded => 12,
            SysCode::EntityUpdated => 13,
            SysCode::EntityMoved => 14,
            SysCode::EntityDeleted => 15,
            SysCode::EntityTombstoned => 16,
            SysCode::EntityFetched => 17,
            SysCode::ScheduleQueued => 18,
            SysCode::ScheduleUpdate => 19,
            SysCode::NotificationAdded => 20,
            SysCode::ReindexEvent => 21,
        }
    }

    #[test]
    fn test_catalog_lists_every_code_once() {
        for (i, code) in SysCode::ALL.into_iter().enumerate() {
            assert_eq!(catalog_index(code), i, "{code}");
        }
        let names: std::collections::HashSet<&str> =
            SysCode::ALL.iter().map(|code| code.as_str()).collect();
        assert_eq!(names.len(), SysCode::ALL.len());
    }

    #[test]
    fn test_unknown_identifier_is_rejected() {
        assert!("NOT_A_CODE".parse::<SysCode>().is_err());
    }

    #[test]
    fn test_collection_codes_are_notifiable_collection_refs() {
        for code in [
            SysCode::CollectionAdded,
            SysCode::CollectionUpdated,
            SysCode::CollectionMoved,
            SysCode::CollectionDeleted,
            SysCode::CollectionTombstoned,
        ] {
            assert!(code.is_notifiable(), "{code}");
            assert!(code.is_collection_ref(), "{code}");
            assert!(code.is_indexable(), "{code}");
        }
    }

    #[test]
    fn test_entity_change_codes_are_notifiable_leaves() {
        for code in [
            SysCode::EntityAdded,
            SysCode::EntityUpdated,
            SysCode::EntityMoved,
            SysCode::EntityDeleted,
            SysCode::EntityTombstoned,
        ] {
            assert!(code.is_notifiable(), "{code}");
            assert!(!code.is_collection_ref(), "{code}");
        }
        assert!(!SysCode::EntityFetched.is_notifiable());
    }

    #[test]
    fn test_timing_codes() {
        assert!(SysCode::TimedHttp.is_timing());
        assert!(SysCode::HttpStats.is_timing());
        assert!(!SysCode::EntityUpdated.is_timing());
        assert_eq!(SysCode::TimedHttp.privilege(), Privilege::Privileged);
    }

    #[test]
    fn test_reindex_is_privileged_and_indexable() {
        let info = SysCode::ReindexEvent.info();
        assert_eq!(info.privilege, Privilege::Privileged);
        assert!(info.indexable);
        assert!(!info.notifiable);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Severe < Severity::Fatal);
        assert_eq!(SysCode::PrincipalDeleted.severity(), Severity::Warn);
    }
}
