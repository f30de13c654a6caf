//! Relay wire frames.
//!
//! Relays speak JSON arrays whose first element is a tag. Only the handful of
//! frames needed for a one-shot query are modelled here; filters and events
//! stay opaque JSON and are forwarded verbatim.

use crate::error::Error;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const TAG_REQ: &str = "REQ";
pub const TAG_CLOSE: &str = "CLOSE";
pub const TAG_EVENT: &str = "EVENT";
pub const TAG_EOSE: &str = "EOSE";
pub const TAG_NOTICE: &str = "NOTICE";
pub const TAG_CLOSED: &str = "CLOSED";

/// A subscription filter. Opaque beyond being a JSON object.
pub type Filter = Map<String, Value>;

/// Builds `["REQ", <subscription_id>, <filter1>, <filter2>, ...]`.
pub fn subscribe_frame(subscription_id: &str, filters: &[Filter]) -> Result<String, Error> {
    let mut frame = Vec::with_capacity(filters.len() + 2);
    frame.push(Value::from(TAG_REQ));
    frame.push(Value::from(subscription_id));
    frame.extend(filters.iter().cloned().map(Value::Object));

    serde_json::to_string(&frame)
        .map_err(|e| Error::transport(format!("Failed to encode subscription: {e}")))
}

/// Builds `["CLOSE", <subscription_id>]`.
pub fn close_frame(subscription_id: &str) -> Result<String, Error> {
    serde_json::to_string(&[TAG_CLOSE, subscription_id])
        .map_err(|e| Error::transport(format!("Failed to encode close: {e}")))
}

/// An event received from the relay. `created_at` is the only inspected field.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEvent {
    created_at: u64,
    raw: Value,
}

impl RelayEvent {
    pub fn from_value(raw: Value) -> Result<Self, Error> {
        let Some(object) = raw.as_object() else {
            return Err(Error::protocol_parse("event payload is not an object"));
        };

        let created_at = object
            .get("created_at")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::protocol_parse("event has no numeric created_at"))?;

        Ok(Self { created_at, raw })
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn as_json(&self) -> &Value {
        &self.raw
    }
}

impl Serialize for RelayEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Event {
        subscription_id: String,
        event: RelayEvent,
    },
    Eose {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    /// Any tag this bridge doesn't act on (OK, AUTH, COUNT, ...).
    Other {
        tag: String,
    },
}

impl RelayFrame {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let parts: Vec<Value> = serde_json::from_str(text)
            .map_err(|e| Error::protocol_parse(format!("expected a JSON array: {e}")))?;

        let tag = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol_parse("frame has no tag"))?;

        match tag {
            TAG_EVENT => {
                let subscription_id = subscription_id_at(&parts, tag)?;
                let payload = parts
                    .get(2)
                    .cloned()
                    .ok_or_else(|| Error::protocol_parse("EVENT frame has no payload"))?;

                Ok(RelayFrame::Event {
                    subscription_id,
                    event: RelayEvent::from_value(payload)?,
                })
            }
            TAG_EOSE => Ok(RelayFrame::Eose {
                subscription_id: subscription_id_at(&parts, tag)?,
            }),
            TAG_NOTICE => Ok(RelayFrame::Notice {
                message: string_at(&parts, 1),
            }),
            TAG_CLOSED => Ok(RelayFrame::Closed {
                subscription_id: string_at(&parts, 1),
                message: string_at(&parts, 2),
            }),
            other => Ok(RelayFrame::Other {
                tag: other.to_string(),
            }),
        }
    }
}

fn subscription_id_at(parts: &[Value], tag: &str) -> Result<String, Error> {
    parts
        .get(1)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::protocol_parse(format!("{tag} frame has no subscription id")))
}

fn string_at(parts: &[Value], index: usize) -> String {
    parts
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
