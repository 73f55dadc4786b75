//! Line protocol codec.
//!
//! Every frame is one JSON object on one line, terminated by `\n`. JSON string
//! escaping guarantees the encoded object never contains a raw newline, so the
//! newline alone delimits frames.
//!
//! # Grammar
//!
//! ```text
//! welcome  := {"type":"welcome","text":STRING}
//! userlist := {"type":"userlist","users":[STRING,...]}
//! chat     := {"user":STRING,"time":STRING,"text":STRING}
//! hello    := {"user":STRING}
//! ```
//!
//! Objects carrying a `"type"` key are control frames. Untyped objects with a
//! `"text"` key are chat records; the remaining untyped objects must name a
//! `"user"` and are registration hellos. Unknown keys are ignored.

use crate::error::ProtoError;
use parley_events::{MessageRecord, now_iso8601};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sender name used for server-originated notifications.
pub const SERVER_USER: &str = "SERVER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub user: String,
    pub time: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Server → client, first frame on every connection.
    Welcome { text: String },
    /// Server → client, online users in registration order.
    UserList { users: Vec<String> },
    /// Chat payload, in either direction.
    Chat(ChatLine),
    /// Client → server, first line only.
    Hello { user: String },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Control<'a> {
    Welcome { text: &'a str },
    Userlist { users: &'a [String] },
}

#[derive(Serialize)]
struct Hello<'a> {
    user: &'a str,
}

impl Frame {
    pub fn welcome(text: impl Into<String>) -> Self {
        Frame::Welcome { text: text.into() }
    }

    pub fn user_list(users: Vec<String>) -> Self {
        Frame::UserList { users }
    }

    pub fn chat(user: impl Into<String>, time: impl Into<String>, text: impl Into<String>) -> Self {
        Frame::Chat(ChatLine {
            user: user.into(),
            time: time.into(),
            text: text.into(),
        })
    }

    pub fn hello(user: impl Into<String>) -> Self {
        Frame::Hello { user: user.into() }
    }

    /// Server notification stamped with the current UTC time.
    pub fn notice(text: impl Into<String>) -> Self {
        Frame::chat(SERVER_USER, now_iso8601(), text)
    }

    /// One line, including the trailing `\n`.
    pub fn encode(&self) -> Result<String, ProtoError> {
        let mut line = match self {
            Frame::Welcome { text } => serde_json::to_string(&Control::Welcome { text }),
            Frame::UserList { users } => serde_json::to_string(&Control::Userlist { users }),
            Frame::Chat(chat) => serde_json::to_string(chat),
            Frame::Hello { user } => serde_json::to_string(&Hello { user }),
        }
        .map_err(ProtoError::Encode)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line. A trailing `\n` or `\r\n` is accepted and ignored.
    pub fn decode(line: &str) -> Result<Self, ProtoError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ProtoError::Empty);
        }
        let value: Value = serde_json::from_str(line).map_err(ProtoError::Malformed)?;
        let Value::Object(obj) = value else {
            return Err(ProtoError::NotAnObject);
        };

        match obj.get("type") {
            Some(Value::String(kind)) => match kind.as_str() {
                "welcome" => Ok(Frame::Welcome {
                    text: string_field(&obj, "text")?,
                }),
                "userlist" => Ok(Frame::UserList {
                    users: string_list(&obj, "users")?,
                }),
                other => Err(ProtoError::UnknownType(other.to_string())),
            },
            Some(_) => Err(ProtoError::FieldType("type")),
            None if obj.contains_key("text") => Ok(Frame::Chat(ChatLine {
                user: string_field(&obj, "user")?,
                time: string_field(&obj, "time")?,
                text: string_field(&obj, "text")?,
            })),
            None => Ok(Frame::Hello {
                user: string_field(&obj, "user")?,
            }),
        }
    }
}

impl From<&MessageRecord> for ChatLine {
    fn from(record: &MessageRecord) -> Self {
        ChatLine {
            user: record.username().to_string(),
            time: record.timestamp().to_string(),
            text: record.text().to_string(),
        }
    }
}

impl From<&ChatLine> for MessageRecord {
    /// Fields longer than the record's fixed storage are truncated.
    fn from(chat: &ChatLine) -> Self {
        MessageRecord::new(&chat.user, &chat.time, &chat.text)
    }
}

fn string_field(obj: &Map<String, Value>, key: &'static str) -> Result<String, ProtoError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ProtoError::FieldType(key)),
        None => Err(ProtoError::MissingField(key)),
    }
}

fn string_list(obj: &Map<String, Value>, key: &'static str) -> Result<Vec<String>, ProtoError> {
    let Some(value) = obj.get(key) else {
        return Err(ProtoError::MissingField(key));
    };
    let Value::Array(items) = value else {
        return Err(ProtoError::FieldType(key));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(ProtoError::FieldType(key)),
        })
        .collect()
}
