//! IRC PING auto-response
//!
//! The connector answers server PINGs itself so that a detached or busy
//! processor never causes a ping timeout. The reply preserves all trailing
//! parameters verbatim: the PONG is the received text from the `PING` token
//! to end-of-line with only the second character rewritten.

/// If `line` is an IRC PING command, return the PONG reply bytes.
///
/// Skips an optional `:prefix ` segment, then matches `PING`
/// case-insensitively followed by a space or end-of-line. Anything else,
/// including lines with illegal IRC syntax, yields `None` and is never an
/// error.
pub fn pong_for_ping(line: &[u8]) -> Option<Vec<u8>> {
    // Skip the ":prefix " segment, if any.
    let mut i = 0;
    if line.first() == Some(&b':') {
        i += 1;
        while i < line.len() && line[i] != b' ' {
            i += 1;
        }
        while i < line.len() && line[i] == b' ' {
            i += 1;
        }
    }

    let rest = &line[i..];
    let is_ping = rest.len() >= 4
        && rest[..4].eq_ignore_ascii_case(b"PING")
        && (rest.len() == 4 || rest[4] == b' ');
    if !is_ping {
        return None;
    }

    // Drop the prefix, turn PING into PONG, keep every parameter byte.
    let mut reply = rest.to_vec();
    reply[1] += b'O' - b'I';
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ping_with_trailing_param() {
        assert_eq!(pong_for_ping(b"PING :token").as_deref(), Some(&b"PONG :token"[..]));
    }

    #[test]
    fn prefixed_ping_drops_prefix() {
        assert_eq!(
            pong_for_ping(b":server.example PING abc").as_deref(),
            Some(&b"PONG abc"[..])
        );
    }

    #[test]
    fn bare_ping_at_end_of_line() {
        assert_eq!(pong_for_ping(b"PING").as_deref(), Some(&b"PONG"[..]));
        assert_eq!(pong_for_ping(b":srv PING").as_deref(), Some(&b"PONG"[..]));
    }

    #[test]
    fn case_insensitive_match_preserves_tail_verbatim() {
        // Only byte index 1 is rewritten, so a lowercase ping stays lowercase.
        assert_eq!(
            pong_for_ping(b"ping :MiXeD case tail").as_deref(),
            Some(&b"pong :MiXeD case tail"[..])
        );
    }

    #[test]
    fn multiple_spaces_after_prefix() {
        assert_eq!(
            pong_for_ping(b":srv   PING x").as_deref(),
            Some(&b"PONG x"[..])
        );
    }

    #[test]
    fn non_ping_lines_yield_nothing() {
        assert_eq!(pong_for_ping(b"PRIVMSG #x :hi"), None);
        assert_eq!(pong_for_ping(b"PINGFOO"), None);
        assert_eq!(pong_for_ping(b"PIN"), None);
        assert_eq!(pong_for_ping(b""), None);
        assert_eq!(pong_for_ping(b":lonelyprefix"), None);
        assert_eq!(pong_for_ping(b":srv NOTICE PING"), None);
    }
}
