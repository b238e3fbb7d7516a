//! Deriving the notification payload carried to sharees for a change event.

use calbus_core::{ResourceChangeNotification, SysCode, SysEvent};

/// Whether the container affected by `event` was shared.
///
/// Move events take the sharing state of the collection the item left.
pub fn was_shared(event: &SysEvent) -> bool {
    match &event.change {
        Some(change) if event.code.is_move() => change.old_shared,
        Some(change) => change.shared,
        None => false,
    }
}

/// Build the notification payload for a leaf-entity change.
///
/// A pre-built payload on the event wins. Otherwise additions become
/// creations, deletions and tombstones become deletions, updates carry their
/// deltas, and moves become a deletion at the source href. Returns `None`
/// when the event describes nothing a sharee could be told about.
pub fn derive_notification(event: &SysEvent) -> Option<ResourceChangeNotification> {
    let change = event.change.as_ref()?;
    if let Some(prebuilt) = &change.notification {
        return Some(prebuilt.clone());
    }

    let href = change.href.as_deref()?;
    match event.code {
        SysCode::EntityAdded => Some(ResourceChangeNotification::created(
            href,
            change.principal.as_str(),
        )),
        SysCode::EntityDeleted | SysCode::EntityTombstoned => Some(
            ResourceChangeNotification::deleted(href, change.principal.as_str()),
        ),
        SysCode::EntityUpdated if !change.updates.is_empty() => Some(
            ResourceChangeNotification::updated(href, change.updates.clone()),
        ),
        SysCode::EntityMoved => {
            let source = change.old_href.as_deref().unwrap_or(href);
            Some(ResourceChangeNotification::deleted(
                source,
                change.principal.as_str(),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calbus_core::{ChangeInfo, ChangeKind, UpdateDelta};

    fn event(code: SysCode, info: ChangeInfo) -> SysEvent {
        SysEvent::change(code, info)
    }

    fn info() -> ChangeInfo {
        ChangeInfo::new("mike", "mike", "/cal/mike/ev1").shared(true)
    }

    #[test]
    fn test_added_derives_creation() {
        let n = derive_notification(&event(SysCode::EntityAdded, info())).unwrap();
        assert_eq!(n.kind(), ChangeKind::Created);
        assert_eq!(n.href, "/cal/mike/ev1");
    }

    #[test]
    fn test_deleted_and_tombstoned_derive_deletion() {
        for code in [SysCode::EntityDeleted, SysCode::EntityTombstoned] {
            let n = derive_notification(&event(code, info())).unwrap();
            assert_eq!(n.kind(), ChangeKind::Deleted, "{code}");
        }
    }

    #[test]
    fn test_update_carries_deltas() {
        let deltas = vec![UpdateDelta::new("mike", &["SUMMARY", "DTSTART"])];
        let n = derive_notification(&event(
            SysCode::EntityUpdated,
            info().with_updates(deltas.clone()),
        ))
        .unwrap();
        assert_eq!(n.updates(), deltas.as_slice());
    }

    #[test]
    fn test_update_without_deltas_derives_nothing() {
        assert!(derive_notification(&event(SysCode::EntityUpdated, info())).is_none());
    }

    #[test]
    fn test_prebuilt_payload_is_used_verbatim() {
        let prebuilt = ResourceChangeNotification::created("/cal/mike/other", "bob");
        let n = derive_notification(&event(
            SysCode::EntityUpdated,
            info().with_notification(prebuilt.clone()),
        ))
        .unwrap();
        assert_eq!(n, prebuilt);
    }

    #[test]
    fn test_move_derives_deletion_at_source() {
        let moved = ChangeInfo::new("mike", "mike", "/cal/mike/private/ev1")
            .moved_from("/cal/mike/shared/ev1", true);
        let ev = event(SysCode::EntityMoved, moved);
        let n = derive_notification(&ev).unwrap();
        assert_eq!(n.kind(), ChangeKind::Deleted);
        assert_eq!(n.href, "/cal/mike/shared/ev1");
        assert!(was_shared(&ev));
    }

    #[test]
    fn test_was_shared_uses_current_flag_for_non_moves() {
        let ev = event(SysCode::EntityAdded, info().moved_from("/x/y", false));
        assert!(was_shared(&ev));
        assert!(!was_shared(&SysEvent::new(SysCode::EntityAdded)));
    }

    #[test]
    fn test_non_entity_codes_derive_nothing() {
        assert!(derive_notification(&event(SysCode::EntityFetched, info())).is_none());
        assert!(derive_notification(&SysEvent::new(SysCode::EntityAdded)).is_none());
    }
}
