use crate::traits::{CecLineSource, CecTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// libCEC's `cec-client`, registered on the bus as an audio system.
#[derive(Debug, Default)]
pub struct CecClientTransport;

impl CecClientTransport {
    pub fn new() -> Self {
        Self
    }
}

/// The OSD name shown on the TV: no spaces, at most 12 characters.
pub fn osd_name(speaker_name: &str) -> String {
    speaker_name
        .chars()
        .take(12)
        .filter(|c| *c != ' ')
        .collect()
}

#[async_trait]
impl CecTransport for CecClientTransport {
    async fn open(&self, osd_name: &str) -> Result<Box<dyn CecLineSource>> {
        // -t a: audio system device type, -d 8: log all bus traffic.
        let mut child = Command::new("cec-client")
            .args(["-t", "a", "-o", osd_name, "-d", "8"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::CommandFailed("cec-client has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::CommandFailed("cec-client has no stderr".into()))?;
        tracing::info!("CEC client started (OSD name {:?})", osd_name);

        // Both streams feed one channel; it closes once both reach EOF.
        let (tx, lines) = mpsc::channel(64);
        tokio::spawn(forward_lines(stdout, tx.clone()));
        tokio::spawn(forward_lines(stderr, tx));

        Ok(Box::new(CecClientLines { _child: child, lines }))
    }
}

/// Copy lines from `reader` into `tx`. Bytes that are not UTF-8 are
/// replaced, never treated as a read error.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("cec-client output unreadable: {}", e);
                break;
            }
        }
    }
}

/// Owns the child so it is killed when the bridge drops the stream.
struct CecClientLines {
    _child: Child,
    lines: mpsc::Receiver<String>,
}

#[async_trait]
impl CecLineSource for CecClientLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osd_name_is_truncated_before_removing_spaces() {
        assert_eq!(osd_name("Living Room Beam"), "LivingRoom");
        assert_eq!(osd_name("Den"), "Den");
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_end_the_stream() {
        let output: &[u8] = b"TRAFFIC: [ 1] >> 05:44:41\n\xff\xfe garbage\r\nTRAFFIC: [ 2] >> 05:44:42";
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(output, tx).await;

        assert_eq!(rx.recv().await.as_deref(), Some("TRAFFIC: [ 1] >> 05:44:41"));
        assert_eq!(rx.recv().await.as_deref(), Some("\u{fffd}\u{fffd} garbage"));
        assert_eq!(rx.recv().await.as_deref(), Some("TRAFFIC: [ 2] >> 05:44:42"));
        assert_eq!(rx.recv().await, None);
    }
}
