//! System-event router.
//!
//! Decides which channels an event belongs on and publishes it to each of
//! them exactly once, synchronously, on the caller's thread. Routing rules are
//! evaluated in a fixed order:
//!
//! 1. A duration-carrying event goes to `monitor`; a pure timing event stops
//!    there.
//! 2. Everything else goes to `syslog`.
//! 3. Change events go to `changes`.
//! 4. `REINDEX_EVENT` goes to `indexer`.
//! 5. Inbox events go to `schedule-in`, outbox events to `schedule-out`;
//!    either stops routing.
//! 6. Schedule-update events go to `schedule-in`.
//!
//! A failed publish on one channel never prevents the remaining attempts.
//! Nothing is retried here.

use std::sync::Arc;

use tracing::{debug, warn};

use calbus_core::{
    logging, Channel, ChannelMessage, ChannelTransport, Error, Result, ScheduleTarget, SysCode,
    SysEvent,
};

/// Publishes system events onto every channel they are routed to.
#[derive(Clone)]
pub struct EventRouter {
    transport: Arc<dyn ChannelTransport>,
}

impl EventRouter {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self { transport }
    }

    /// Channels an event is published to, in publish order.
    pub fn route(event: &SysEvent) -> Vec<Channel> {
        let mut plan = Vec::with_capacity(3);

        if event.millis.is_some() {
            plan.push(Channel::Monitor);
            if event.code.is_timing() {
                return plan;
            }
        }

        plan.push(Channel::Syslog);

        if event.is_change_event() {
            plan.push(Channel::Changes);
        }

        if event.code == SysCode::ReindexEvent {
            plan.push(Channel::Indexer);
        }

        match event.schedule {
            Some(ScheduleTarget::Inbox) => {
                plan.push(Channel::ScheduleIn);
                return plan;
            }
            Some(ScheduleTarget::Outbox) => {
                plan.push(Channel::ScheduleOut);
                return plan;
            }
            None => {}
        }

        if event.is_schedule_event() {
            plan.push(Channel::ScheduleIn);
        }

        plan
    }

    /// Publish an event to every channel in its routing plan.
    ///
    /// Returns the channels published to. If any publish fails, every other
    /// channel is still attempted and one `Error::Publish` names all failures.
    pub fn publish(&self, event: SysEvent) -> Result<Vec<Channel>> {
        let plan = Self::route(&event);
        debug!(
            subsystem = logging::SUBSYSTEM_BUS,
            component = logging::COMPONENT_ROUTER,
            syscode = %event.code,
            event_id = %event.id,
            channels = ?plan,
            "Routing event"
        );

        let message = ChannelMessage::from_event(event);
        let mut failed: Vec<(Channel, String)> = Vec::new();

        for &channel in &plan {
            if let Err(e) = self.transport.publish(channel, &message) {
                warn!(
                    subsystem = logging::SUBSYSTEM_BUS,
                    component = logging::COMPONENT_ROUTER,
                    syscode = %message.event.code,
                    channel = %channel,
                    error = %e,
                    "Failed to publish event"
                );
                failed.push((channel, e.to_string()));
            }
        }

        if failed.is_empty() {
            return Ok(plan);
        }

        Err(Error::Publish {
            channel: failed
                .iter()
                .map(|(c, _)| c.as_str())
                .collect::<Vec<_>>()
                .join(","),
            message: failed
                .into_iter()
                .map(|(_, e)| e)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use calbus_core::ChangeInfo;

    fn change(code: SysCode) -> SysEvent {
        SysEvent::change(code, ChangeInfo::new("mike", "mike", "/cal/mike/ev1"))
    }

    #[test]
    fn test_timing_event_goes_to_monitor_only() {
        let event = SysEvent::timed(SysCode::TimedHttp, 15);
        assert_eq!(EventRouter::route(&event), vec![Channel::Monitor]);
    }

    #[test]
    fn test_timing_code_without_duration_goes_to_syslog() {
        let event = SysEvent::new(SysCode::HttpStats);
        assert_eq!(EventRouter::route(&event), vec![Channel::Syslog]);
    }

    #[test]
    fn test_non_timing_event_with_duration_also_goes_to_syslog() {
        let event = change(SysCode::EntityUpdated).with_millis(3);
        assert_eq!(
            EventRouter::route(&event),
            vec![Channel::Monitor, Channel::Syslog, Channel::Changes]
        );
    }

    #[test]
    fn test_plain_event_goes_to_syslog() {
        let event = SysEvent::new(SysCode::ServiceStarted);
        assert_eq!(EventRouter::route(&event), vec![Channel::Syslog]);
    }

    #[test]
    fn test_change_event_goes_to_changes() {
        assert_eq!(
            EventRouter::route(&change(SysCode::EntityAdded)),
            vec![Channel::Syslog, Channel::Changes]
        );
    }

    #[test]
    fn test_reindex_goes_to_indexer() {
        let event = SysEvent::new(SysCode::ReindexEvent);
        assert_eq!(
            EventRouter::route(&event),
            vec![Channel::Syslog, Channel::Indexer]
        );
    }

    #[test]
    fn test_inbox_and_outbox() {
        let inbox = SysEvent::new(SysCode::ScheduleQueued).with_schedule(ScheduleTarget::Inbox);
        assert_eq!(
            EventRouter::route(&inbox),
            vec![Channel::Syslog, Channel::ScheduleIn]
        );

        let outbox = SysEvent::new(SysCode::ScheduleQueued).with_schedule(ScheduleTarget::Outbox);
        assert_eq!(
            EventRouter::route(&outbox),
            vec![Channel::Syslog, Channel::ScheduleOut]
        );
    }

    #[test]
    fn test_outbox_stops_before_schedule_update_rule() {
        let event = SysEvent::new(SysCode::ScheduleUpdate).with_schedule(ScheduleTarget::Outbox);
        assert_eq!(
            EventRouter::route(&event),
            vec![Channel::Syslog, Channel::ScheduleOut]
        );
    }

    #[test]
    fn test_inbox_schedule_update_is_published_once() {
        let event = SysEvent::new(SysCode::ScheduleUpdate).with_schedule(ScheduleTarget::Inbox);
        let plan = EventRouter::route(&event);
        assert_eq!(
            plan.iter().filter(|&&c| c == Channel::ScheduleIn).count(),
            1
        );
    }

    #[test]
    fn test_schedule_update_goes_to_schedule_in() {
        let event = SysEvent::new(SysCode::ScheduleUpdate);
        assert_eq!(
            EventRouter::route(&event),
            vec![Channel::Syslog, Channel::ScheduleIn]
        );
    }

    #[test]
    fn test_publish_reaches_every_planned_channel() {
        let transport = Arc::new(LocalTransport::default());
        let router = EventRouter::new(transport.clone());

        let published = router.publish(change(SysCode::EntityDeleted)).unwrap();
        assert_eq!(published, vec![Channel::Syslog, Channel::Changes]);
        assert_eq!(transport.published_count(Channel::Syslog), 1);
        assert_eq!(transport.published_count(Channel::Changes), 1);
        assert_eq!(transport.published_count(Channel::Monitor), 0);
    }

    #[test]
    fn test_failed_channel_does_not_block_others() {
        let transport = Arc::new(LocalTransport::default());
        transport.close(Channel::Syslog);
        let router = EventRouter::new(transport.clone());

        let err = router.publish(change(SysCode::EntityAdded)).unwrap_err();
        match err {
            Error::Publish { channel, .. } => assert_eq!(channel, "syslog"),
            other => panic!("Expected Publish error, got {other:?}"),
        }
        assert_eq!(transport.published_count(Channel::Changes), 1);
    }
}
