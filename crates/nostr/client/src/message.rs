//! Nostr relay message types.
//!
//! This module implements the relay protocol messages as specified in NIP-01:
//! - Client to Relay: EVENT, REQ, CLOSE
//! - Relay to Client: EVENT, OK, EOSE, CLOSED, NOTICE, AUTH

use nostr::{Event, Filter};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Serialize to JSON array for sending to relay.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

fn string_at(arr: &[Value], idx: usize, field: &str) -> Result<String, MessageError> {
    arr.get(idx)
        .ok_or_else(|| MessageError::MissingField(field.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}

impl RelayMessage {
    /// Parse a JSON message from the relay.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        let msg_type = arr
            .first()
            .ok_or_else(|| MessageError::InvalidFormat("empty array".to_string()))?
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))?;

        match msg_type {
            "EVENT" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let raw = arr
                    .get(2)
                    .cloned()
                    .ok_or_else(|| MessageError::MissingField("event".to_string()))?;
                let event: Event = serde_json::from_value(raw)?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = string_at(&arr, 1, "event_id")?;
                let success = arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| MessageError::InvalidFormat("success not a boolean".to_string()))?;
                let message = arr.get(3).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
                message: arr.get(2).and_then(Value::as_str).unwrap_or("").to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&arr, 1, "message")?,
            }),
            "AUTH" => Ok(RelayMessage::Auth {
                challenge: string_at(&arr, 1, "challenge")?,
            }),
            _ => Err(MessageError::UnknownType(msg_type.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event() -> Event {
        Event {
            id: "abc123".to_string(),
            pubkey: "pubkey123".to_string(),
            created_at: 1234567890,
            kind: 32767,
            tags: vec![vec!["d".to_string(), "job".to_string()]],
            content: "Hello".to_string(),
            sig: "sig123".to_string(),
        }
    }

    #[test]
    fn test_client_message_event() {
        let json = ClientMessage::Event(test_event()).to_json().unwrap();
        assert!(json.starts_with(r#"["EVENT",{"#));
        assert!(json.contains("abc123"));
    }

    #[test]
    fn test_client_message_req_omits_unconstrained_fields() {
        let msg = ClientMessage::Req {
            subscription_id: "sub1".to_string(),
            filters: vec![
                Filter::new().kinds([32767]).authors(Vec::<String>::new()),
                Filter::new().kinds([4]).tag("p", ["pk"]),
            ],
        };

        let json = msg.to_json().unwrap();
        assert_eq!(
            json,
            r##"["REQ","sub1",{"kinds":[32767]},{"kinds":[4],"#p":["pk"]}]"##
        );
    }

    #[test]
    fn test_client_message_close() {
        let msg = ClientMessage::Close {
            subscription_id: "sub1".to_string(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub1"]"#);
    }

    #[test]
    fn test_relay_message_event() {
        let json = r#"["EVENT","sub1",{"id":"abc","pubkey":"pk","created_at":123,"kind":1,"tags":[],"content":"Hello","sig":"sig"}]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.id, "abc");
                assert_eq!(event.content, "Hello");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_ok() {
        let msg = RelayMessage::from_json(r#"["OK","event123",false,"duplicate: already have this event"]"#)
            .unwrap();
        assert_eq!(
            msg,
            RelayMessage::Ok {
                event_id: "event123".to_string(),
                success: false,
                message: "duplicate: already have this event".to_string(),
            }
        );

        let msg = RelayMessage::from_json(r#"["OK","event123",true]"#).unwrap();
        assert!(matches!(msg, RelayMessage::Ok { success: true, .. }));
    }

    #[test]
    fn test_relay_message_eose_closed_notice_auth() {
        assert_eq!(
            RelayMessage::from_json(r#"["EOSE","sub1"]"#).unwrap(),
            RelayMessage::Eose {
                subscription_id: "sub1".to_string()
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["CLOSED","sub1","error: too many subscriptions"]"#)
                .unwrap(),
            RelayMessage::Closed {
                subscription_id: "sub1".to_string(),
                message: "error: too many subscriptions".to_string(),
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["NOTICE","rate limited"]"#).unwrap(),
            RelayMessage::Notice {
                message: "rate limited".to_string()
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["AUTH","challenge123"]"#).unwrap(),
            RelayMessage::Auth {
                challenge: "challenge123".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_message() {
        assert!(matches!(
            RelayMessage::from_json("not valid json"),
            Err(MessageError::InvalidFormat(_))
        ));
        assert!(RelayMessage::from_json("[]").is_err());
        assert!(matches!(
            RelayMessage::from_json(r#"["UNKNOWN"]"#),
            Err(MessageError::UnknownType(_))
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["EOSE"]"#),
            Err(MessageError::MissingField(_))
        ));
        assert!(RelayMessage::from_json(r#"["EVENT","sub1",{"id":1}]"#).is_err());
    }
}
