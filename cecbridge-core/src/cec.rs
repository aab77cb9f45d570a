//! TV remote to speaker translation.
//!
//! `cec-client -d 8` prints every frame on the bus. Received frames are
//! marked `>>`, e.g. `TRAFFIC: [  1234]  >> 05:44:41`: source 0 (TV) to
//! destination 5 (audio system), opcode 0x44 (user control pressed) with
//! operand 0x41 (volume up).

use crate::traits::{CecLineSource, SpeakerRegistry};
use crate::watchdog::ConnectivityWatchdog;
use crate::Result;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CecCommand {
    VolumeUp,
    VolumeDown,
    MuteToggle,
}

impl CecCommand {
    const ALL: [CecCommand; 3] = [CecCommand::VolumeUp, CecCommand::VolumeDown, CecCommand::MuteToggle];

    /// The user-control-pressed frame body, `44:<key>`.
    fn frame(self) -> &'static str {
        match self {
            CecCommand::VolumeUp => "44:41",
            CecCommand::VolumeDown => "44:42",
            CecCommand::MuteToggle => "44:43",
        }
    }
}

/// Map one line of bus traffic to a command.
///
/// First pass: a received frame from the TV addressed to the audio system
/// (`05`) or broadcast (`0f`). Second pass: the key code from any source,
/// as long as the line is a received frame. The second pass is loose on
/// purpose; some TVs relay keys through other logical addresses.
pub fn classify(line: &str) -> Option<CecCommand> {
    for command in CecCommand::ALL {
        let frame = command.frame();
        if line.contains(&format!(">> 05:{frame}")) || line.contains(&format!(">> 0f:{frame}")) {
            return Some(command);
        }
    }
    if !line.contains(">>") {
        return None;
    }
    CecCommand::ALL
        .into_iter()
        .find(|command| line.contains(&format!(":{}", command.frame())))
}

/// Drives one speaker from the CEC stream.
pub struct CecEventBridge {
    speakers: Arc<dyn SpeakerRegistry>,
    address: String,
    volume_step: i16,
}

impl CecEventBridge {
    pub fn new(speakers: Arc<dyn SpeakerRegistry>, address: &str, volume_step: i16) -> Self {
        Self {
            speakers,
            address: address.to_string(),
            volume_step,
        }
    }

    /// Execute one command. Speaker failures are logged, never returned.
    pub async fn handle(&self, command: CecCommand) {
        let outcome = match command {
            CecCommand::VolumeUp | CecCommand::VolumeDown => {
                let delta = if command == CecCommand::VolumeUp {
                    self.volume_step
                } else {
                    -self.volume_step
                };
                self.speakers
                    .adjust_volume(&self.address, delta)
                    .await
                    .map(|level| tracing::info!("🔊 {:?} -> {}%", command, level))
            }
            CecCommand::MuteToggle => self
                .speakers
                .toggle_mute(&self.address)
                .await
                .map(|muted| tracing::info!("🔇 Mute toggled -> {}", if muted { "muted" } else { "unmuted" })),
        };
        if let Err(e) = outcome {
            tracing::error!("{:?} on {} failed: {}", command, self.address, e.detail());
        }
    }

    /// Read lines until the transport closes, running the watchdog on its
    /// interval in between. A slow speaker delays the next line, never the
    /// other way round for longer than one bounded check.
    pub async fn run(&self, source: &mut dyn CecLineSource, watchdog: &mut ConnectivityWatchdog) -> Result<()> {
        tracing::info!("Listening for TV remote volume commands on {}", self.address);
        let period = watchdog.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = source.next_line() => {
                    let Some(line) = line? else {
                        tracing::warn!("CEC transport closed");
                        return Ok(());
                    };
                    if let Some(command) = classify(&line) {
                        tracing::debug!("CEC: {}", line.trim());
                        self.handle(command).await;
                    }
                }
                _ = ticker.tick() => watchdog.tick().await,
            }
        }
    }
}
