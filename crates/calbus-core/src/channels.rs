//! Logical channel names and the message envelope carried on them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::SysEvent;

/// A named, durable, at-least-once delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Timing and latency events.
    Monitor,
    /// Catch-all audit trail.
    Syslog,
    /// Change events feeding the notification pipeline.
    Changes,
    /// Search reindex requests.
    Indexer,
    /// Incoming scheduling messages.
    ScheduleIn,
    /// Outgoing scheduling messages.
    ScheduleOut,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Monitor,
        Channel::Syslog,
        Channel::Changes,
        Channel::Indexer,
        Channel::ScheduleIn,
        Channel::ScheduleOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Monitor => "monitor",
            Channel::Syslog => "syslog",
            Channel::Changes => "changes",
            Channel::Indexer => "indexer",
            Channel::ScheduleIn => "schedule-in",
            Channel::ScheduleOut => "schedule-out",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope published on a channel: routing attributes plus the event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub attributes: BTreeMap<String, String>,
    pub event: SysEvent,
}

impl ChannelMessage {
    /// Wrap an event, attaching its routing attributes.
    pub fn from_event(event: SysEvent) -> Self {
        Self {
            attributes: event.routing_attributes(),
            event,
        }
    }

    /// Boolean value of a routing attribute; absent means `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|v| v == "true")
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(body: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// A message received from a channel subscription, pending acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport-assigned id, unique per subscription.
    pub delivery_id: u64,
    pub channel: Channel,
    pub message: ChannelMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{attrs, ChangeInfo};
    use crate::taxonomy::SysCode;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::ScheduleIn.to_string(), "schedule-in");
        assert_eq!(
            serde_json::to_string(&Channel::ScheduleOut).unwrap(),
            "\"schedule-out\""
        );
        for channel in Channel::ALL {
            let json = serde_json::to_string(&channel).unwrap();
            assert_eq!(json, format!("\"{}\"", channel.as_str()));
        }
    }

    #[test]
    fn test_message_flags() {
        let event = SysEvent::change(
            SysCode::EntityAdded,
            ChangeInfo::new("mike", "mike", "/cal/mike/ev1"),
        );
        let message = ChannelMessage::from_event(event);
        assert!(message.flag(attrs::CHANGE_EVENT));
        assert!(!message.flag(attrs::INBOX));
        assert!(!message.flag("missing"));
    }

    #[test]
    fn test_message_json_body() {
        let message = ChannelMessage::from_event(SysEvent::timed(SysCode::TimedHttp, 12));
        let body = message.to_json().unwrap();
        assert!(body.contains("\"syscode\":\"TIMED_HTTP\""));
        assert_eq!(ChannelMessage::from_json(&body).unwrap(), message);
    }
}
