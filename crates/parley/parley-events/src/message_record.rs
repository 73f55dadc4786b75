#![forbid(unsafe_code)]

use std::fmt;

/// Storage for the username field, including the NUL terminator.
pub const MAX_USERNAME_LEN: usize = 32;
/// Storage for the timestamp field, including the NUL terminator.
pub const MAX_TIMESTAMP_LEN: usize = 32;
/// Storage for the message text field, including the NUL terminator.
pub const MAX_TEXT_LEN: usize = 512;

// Fixed-size chat message, stored by value in the shared ring.
// POD -> every field is a byte array, so an all-zero block is a valid (empty) record
// and the layout is identical in every process that maps it.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MessageRecord {
    username: [u8; MAX_USERNAME_LEN],
    timestamp: [u8; MAX_TIMESTAMP_LEN],
    text: [u8; MAX_TEXT_LEN],
    valid: u8, // 0 = empty/consumed, 1 = populated
}

impl MessageRecord {
    /// An empty, invalid record. Same bytes as a freshly zeroed slot.
    pub const fn zeroed() -> Self {
        Self {
            username: [0; MAX_USERNAME_LEN],
            timestamp: [0; MAX_TIMESTAMP_LEN],
            text: [0; MAX_TEXT_LEN],
            valid: 0,
        }
    }

    /// Builds a populated record.
    ///
    /// Each field keeps at most `capacity - 1` bytes; longer input is cut at
    /// the last UTF-8 character boundary that fits, so the stored value is
    /// always valid UTF-8 and always NUL terminated.
    pub fn new(username: &str, timestamp: &str, text: &str) -> Self {
        let mut record = Self::zeroed();
        fill(&mut record.username, username);
        fill(&mut record.timestamp, timestamp);
        fill(&mut record.text, text);
        record.valid = 1;
        record
    }

    /// Builds a populated record stamped with the current UTC time.
    pub fn stamped(username: &str, text: &str) -> Self {
        Self::new(username, &crate::timestamp::now_iso8601(), text)
    }

    #[inline]
    pub fn username(&self) -> &str {
        field_str(&self.username)
    }

    #[inline]
    pub fn timestamp(&self) -> &str {
        field_str(&self.timestamp)
    }

    #[inline]
    pub fn text(&self) -> &str {
        field_str(&self.text)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }

    /// Marks the record as consumed. The field bytes are left in place.
    #[inline]
    pub fn invalidate(&mut self) {
        self.valid = 0;
    }
}

impl Default for MessageRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for MessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRecord")
            .field("username", &self.username())
            .field("timestamp", &self.timestamp())
            .field("text", &self.text())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl fmt::Display for MessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.timestamp(), self.username(), self.text())
    }
}

/// Returns the longest prefix of `s` that fits in `max_bytes` without
/// splitting a character.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn fill(dst: &mut [u8], src: &str) {
    // keep one byte for the terminator; stop at an embedded NUL
    let src = src.split('\0').next().unwrap_or_default();
    let src = truncate_utf8(src, dst.len() - 1);
    dst[..src.len()].copy_from_slice(src.as_bytes());
    dst[src.len()..].fill(0);
}

fn field_str(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    // A peer process may have written garbage; expose only the valid prefix.
    match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    /// The record is mapped by unrelated processes, so its size and alignment are
    /// part of the shared layout and must not drift.
    #[test]
    fn record_layout_is_stable() {
        assert_eq!(
            size_of::<MessageRecord>(),
            MAX_USERNAME_LEN + MAX_TIMESTAMP_LEN + MAX_TEXT_LEN + 1
        );
        assert_eq!(align_of::<MessageRecord>(), 1);
    }

    #[test]
    fn zeroed_record_is_invalid_and_empty() {
        let r = MessageRecord::zeroed();
        assert!(!r.is_valid());
        assert_eq!(r.username(), "");
        assert_eq!(r.text(), "");
        assert_eq!(r, MessageRecord::default());
    }

    #[test]
    fn new_record_round_trips_fields() {
        let r = MessageRecord::new("alice", "2024-01-02T03:04:05", "hello there");
        assert!(r.is_valid());
        assert_eq!(r.username(), "alice");
        assert_eq!(r.timestamp(), "2024-01-02T03:04:05");
        assert_eq!(r.text(), "hello there");
        assert_eq!(r.to_string(), "[2024-01-02T03:04:05] alice: hello there");
    }

    #[test]
    fn long_username_keeps_first_31_bytes() {
        let name = "abcdefghijklmnopqrstuvwxyz0123456789ABCD"; // 40 chars
        let r = MessageRecord::new(name, "t", "x");
        assert_eq!(r.username(), &name[..31]);
        assert!(r.is_valid());
    }

    #[test]
    fn long_text_is_cut_to_511_bytes() {
        let text = "z".repeat(2000);
        let r = MessageRecord::new("u", "t", &text);
        assert_eq!(r.text().len(), MAX_TEXT_LEN - 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; 16 of them = 32 bytes, only 15 fit in 31 bytes
        let name = "é".repeat(16);
        let r = MessageRecord::new(&name, "t", "x");
        assert_eq!(r.username(), "é".repeat(15));
        assert_eq!(truncate_utf8("aé", 2), "a");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn embedded_nul_ends_the_field() {
        let r = MessageRecord::new("bob\0evil", "t", "x");
        assert_eq!(r.username(), "bob");
    }

    #[test]
    fn invalidate_keeps_content() {
        let mut r = MessageRecord::new("u", "t", "kept");
        r.invalidate();
        assert!(!r.is_valid());
        assert_eq!(r.text(), "kept");
    }
}
