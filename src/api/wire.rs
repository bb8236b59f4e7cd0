// src/api/wire.rs

//! The raw framed-JSON wire protocol used over the UNIX listener sockets
//! (`lsnr/lsnr.sock`), per spec.md §6: each request is a JSON document
//! terminated by a single `\x00` byte, capped at a 4096-byte initial read,
//! with an action name resolved through a static table into the
//! equivalent HTTP `(method, path)` the raw socket otherwise mirrors.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum bytes read for one framed request before it is rejected.
pub const MAX_FRAME_BYTES: usize = 4096;
const TERMINATOR: u8 = 0;

/// `(action name, HTTP method, HTTP path)`. The raw socket and the HTTP
/// surface are two transports over the same action set.
pub const ACTION_TABLE: &[(&str, &str, &str)] = &[
    ("daemon_status", "GET", "/daemon/status"),
    ("daemon_events", "GET", "/daemon/events"),
    ("object_monitor", "POST", "/object/monitor"),
    ("object_action_switch", "POST", "/object/action/switch"),
    ("object_action_start", "POST", "/object/action/start"),
    ("object_action_stop", "POST", "/object/action/stop"),
    ("object_action_freeze", "POST", "/object/action/freeze"),
    ("object_action_thaw", "POST", "/object/action/thaw"),
    ("object_action_placed_at", "POST", "/object/action/placed_at"),
    ("node_clear", "POST", "/node/clear"),
    ("node_monitor", "POST", "/node/monitor"),
    ("object_clear", "POST", "/object/clear"),
    ("object_abort", "POST", "/object/abort"),
    ("auth_token", "POST", "/auth/token"),
    ("relay_message", "GET", "/relay/message"),
];

/// Resolves a wire action name to its `(method, path)` pair, or `None` for
/// an unrecognized action.
pub fn resolve_action(name: &str) -> Option<(&'static str, &'static str)> {
    ACTION_TABLE
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, m, p)| (*m, *p))
}

#[derive(Debug)]
pub enum FrameError {
    TooLarge,
    Io(std::io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLarge => write!(f, "frame exceeded {MAX_FRAME_BYTES} bytes"),
            FrameError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Reads one `\x00`-terminated frame. Returns `Ok(None)` on a clean EOF
/// before any byte is read, `Err(TooLarge)` if the terminator hasn't
/// appeared within `MAX_FRAME_BYTES`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, FrameError> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await.map_err(FrameError::Io)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Ok(Some(buf));
        }
        if byte[0] == TERMINATOR {
            return Ok(Some(buf));
        }
        buf.push(byte[0]);
        if buf.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_action_resolves() {
        assert_eq!(
            resolve_action("object_monitor"),
            Some(("POST", "/object/monitor"))
        );
    }

    #[test]
    fn unknown_action_is_none() {
        assert_eq!(resolve_action("bogus"), None);
    }

    #[tokio::test]
    async fn reads_one_terminated_frame() {
        let mut data: &[u8] = b"{\"a\":1}\x00{\"b\":2}\x00";
        let first = read_frame(&mut data).await.unwrap().unwrap();
        assert_eq!(first, b"{\"a\":1}");
        let second = read_frame(&mut data).await.unwrap().unwrap();
        assert_eq!(second, b"{\"b\":2}");
        assert!(read_frame(&mut data).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut data = vec![b'x'; MAX_FRAME_BYTES + 10];
        data.push(0);
        let mut slice: &[u8] = &data;
        assert!(matches!(
            read_frame(&mut slice).await,
            Err(FrameError::TooLarge)
        ));
    }
}
