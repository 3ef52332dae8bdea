//! Bijective `(sessionId, streamId, sequence)` ↔ opaque `eventId` encoding.
//! spec.md C3.
//!
//! `sessionId` may itself contain `:`, so each component is base64-encoded
//! before being joined — spec.md §3 "EventId encoding".

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

/// The standalone GET SSE stream's reserved stream id (spec.md §3).
pub const STANDALONE_STREAM_ID: &str = "__get__";

/// Encode `(session_id, stream_id, sequence)` into an opaque event id safe
/// to carry in an SSE `id:` line (visible ASCII only, per spec.md §3).
pub fn format(session_id: &str, stream_id: &str, sequence: u64) -> String {
    format!(
        "{}:{}:{}",
        STANDARD_NO_PAD.encode(session_id),
        STANDARD_NO_PAD.encode(stream_id),
        sequence
    )
}

/// Decode an event id produced by [`format`]. Returns `None` — never
/// panics — for any string not of that shape: spec.md §8 property 1
/// requires `parse` to fail cleanly on malformed input.
pub fn parse(event_id: &str) -> Option<(String, String, u64)> {
    let mut parts = event_id.splitn(3, ':');
    let session_b64 = parts.next()?;
    let stream_b64 = parts.next()?;
    let sequence_str = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let session_id = String::from_utf8(STANDARD_NO_PAD.decode(session_b64).ok()?).ok()?;
    let stream_id = String::from_utf8(STANDARD_NO_PAD.decode(stream_b64).ok()?).ok()?;
    let sequence: u64 = sequence_str.parse().ok()?;

    Some((session_id, stream_id, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_visible_ascii() {
        let cases: &[(&str, &str, u64)] = &[
            ("session-1", "__get__", 0),
            ("a:b:c", "req-42", 9_999_999),
            ("", "", 0),
            ("weird!@#$", "stream:with:colons", 7),
        ];
        for &(session, stream, seq) in cases {
            let encoded = format(session, stream, seq);
            assert_eq!(parse(&encoded), Some((session.to_string(), stream.to_string(), seq)));
        }
    }

    #[test]
    fn rejects_malformed_ids_without_panicking() {
        let malformed = [
            "not-base64-at-all:also-not:0",
            "abc:def",          // wrong separator count (too few)
            "abc:def:12:34",    // wrong separator count (too many)
            "YWJj:ZGVm:notanumber",
            "",
            ":",
            "::",
        ];
        for input in malformed {
            assert_eq!(parse(input), None, "expected parse failure for {input:?}");
        }
    }

    #[test]
    fn event_ids_embed_session_so_they_are_globally_unique() {
        let a = format("session-a", "__get__", 0);
        let b = format("session-b", "__get__", 0);
        assert_ne!(a, b);
    }
}
