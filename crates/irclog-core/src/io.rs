//! Line-oriented socket plumbing
//!
//! Shared by every socket in the system: IRC server connections, the
//! connector's processor link, and the processor's connector link. Writing
//! goes through a small dedicated task fed by an unbounded channel so that a
//! stalled peer never blocks the dispatcher; reading is a buffered
//! `read_until` that hands back clean lines.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::line::CleanLine;

/// Longest line accepted from any socket; longer input is truncated.
pub const MAX_LINE_LEN: usize = 1000;

enum WriterMsg {
    Write(CleanLine),
    Shutdown,
}

/// Handle to a writer task. Cloneable; all clones feed the same socket.
///
/// Writes are fire-and-forget: once the task has ended (socket error or
/// `terminate`), further posts are silently dropped. Callers that care about
/// delivery learn of failures from their own read loop.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<WriterMsg>,
}

impl WriterHandle {
    /// Queue one line for writing. Never blocks, never fails observably.
    pub fn post_write(&self, line: CleanLine) {
        let _ = self.tx.send(WriterMsg::Write(line));
    }

    /// Ask the writer task to finish after draining queued lines.
    pub fn terminate(&self) {
        let _ = self.tx.send(WriterMsg::Shutdown);
    }
}

/// Spawn a writer task over `sink`, appending `newline` after every line.
///
/// IRC sockets use `b"\r\n"`, the connector↔processor link uses `b"\n"`.
pub fn spawn_writer<W>(mut sink: W, newline: &'static [u8]) -> WriterHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                WriterMsg::Write(line) => {
                    let write = async {
                        sink.write_all(line.as_bytes()).await?;
                        sink.write_all(newline).await?;
                        sink.flush().await
                    };
                    if let Err(err) = write.await {
                        debug!("writer task stopping: {err}");
                        break;
                    }
                }
                WriterMsg::Shutdown => break,
            }
        }
        let _ = sink.shutdown().await;
    });
    WriterHandle { tx }
}

/// Read one newline-terminated line, cleaned of NUL/CR/LF.
///
/// Returns `Ok(None)` at end of stream. Lines longer than [`MAX_LINE_LEN`]
/// are truncated to that length.
pub async fn read_clean_line<R>(reader: &mut R) -> std::io::Result<Option<CleanLine>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    let line = CleanLine::new(buf);
    if line.len() <= MAX_LINE_LEN {
        return Ok(Some(line));
    }
    warn!("truncating over-long line of {} bytes", line.len());
    let mut bytes = line.into_bytes();
    bytes.truncate(MAX_LINE_LEN);
    Ok(Some(CleanLine::from_clean(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn writer_appends_configured_newline() {
        let (client, server) = tokio::io::duplex(256);
        let writer = spawn_writer(client, b"\r\n");
        writer.post_write(CleanLine::from("NICK alice"));
        writer.terminate();

        let mut reader = BufReader::new(server);
        let mut buf = Vec::new();
        reader.read_until(b'\n', &mut buf).await.unwrap();
        assert_eq!(buf, b"NICK alice\r\n");
    }

    #[tokio::test]
    async fn read_clean_line_strips_crlf_and_reports_eof() {
        let (client, server) = tokio::io::duplex(256);
        let writer = spawn_writer(client, b"\r\n");
        writer.post_write(CleanLine::from("PING :x"));
        writer.terminate();

        let mut reader = BufReader::new(server);
        let line = read_clean_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.as_bytes(), b"PING :x");
        assert!(read_clean_line(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn over_long_lines_are_truncated_to_the_limit() {
        let (client, server) = tokio::io::duplex(4096);
        let writer = spawn_writer(client, b"\r\n");
        writer.post_write(CleanLine::from_clean(vec![b'a'; MAX_LINE_LEN + 1]));
        writer.post_write(CleanLine::from_clean(vec![b'b'; MAX_LINE_LEN]));
        writer.terminate();

        let mut reader = BufReader::new(server);
        let line = read_clean_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert!(line.as_bytes().iter().all(|&b| b == b'a'));

        // A line exactly at the limit passes through whole.
        let line = read_clean_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert!(line.as_bytes().iter().all(|&b| b == b'b'));
    }

    #[tokio::test]
    async fn posts_after_terminate_are_dropped() {
        let (client, server) = tokio::io::duplex(256);
        let writer = spawn_writer(client, b"\n");
        writer.terminate();
        writer.post_write(CleanLine::from("late"));

        let mut reader = BufReader::new(server);
        let mut buf = Vec::new();
        let n = reader.read_until(b'\n', &mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
