pub mod message_record;
pub mod timestamp;

pub use message_record::{
    MAX_TEXT_LEN, MAX_TIMESTAMP_LEN, MAX_USERNAME_LEN, MessageRecord, truncate_utf8,
};
pub use timestamp::{iso8601_utc, now_iso8601};
