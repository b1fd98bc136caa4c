use std::{fmt, sync::Arc, time::Duration};

use shared::protocol::Envelope;
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::channel::{self, ChannelWriter};

/// Live writer half of a channel, shared between the supervisor (which
/// installs and removes it) and handles that send on it.
pub type WriterSlot = Arc<Mutex<Option<ChannelWriter>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Backoff,
    Dormant,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Backoff => "backing-off",
            ConnectionStatus::Dormant => "dormant",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

/// Owns one channel's lifecycle: connect, pump frames into the broadcast
/// sender, back off on failure, go dormant after the attempt ceiling, retry
/// immediately on resume. Status is published over a watch channel.
pub struct ReconnectSupervisor {
    task: JoinHandle<()>,
    writer: WriterSlot,
    resume_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: watch::Sender<bool>,
    status_tx: watch::Sender<ConnectionState>,
    status_rx: watch::Receiver<ConnectionState>,
}

impl ReconnectSupervisor {
    pub fn spawn(
        endpoint: String,
        policy: ReconnectPolicy,
        writer: WriterSlot,
        frames: broadcast::Sender<Envelope>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionState::default());
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            endpoint,
            policy,
            writer.clone(),
            frames,
            status_tx.clone(),
            resume_rx,
            shutdown_rx,
        ));
        Self {
            task,
            writer,
            resume_tx,
            shutdown_tx,
            status_tx,
            status_rx,
        }
    }

    /// Forces an immediate reconnect attempt, waking a backoff timer or a
    /// dormant supervisor. Ignored while the channel is open.
    pub fn resume(&self) {
        let _ = self.resume_tx.send(());
    }

    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status_rx.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.close().await;
        }
        let _ = self.status_tx.send(ConnectionState {
            status: ConnectionStatus::Closed,
            attempt_count: 0,
            last_error: None,
        });
    }
}

async fn run(
    endpoint: String,
    policy: ReconnectPolicy,
    writer: WriterSlot,
    frames: broadcast::Sender<Envelope>,
    status_tx: watch::Sender<ConnectionState>,
    mut resume_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut last_error: Option<String> = None;

    let publish = |status: ConnectionStatus, attempt_count: u32, last_error: Option<String>| {
        let _ = status_tx.send(ConnectionState {
            status,
            attempt_count,
            last_error,
        });
    };

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        publish(ConnectionStatus::Connecting, attempt, last_error.clone());
        debug!(endpoint = %endpoint, attempt, "connecting");

        let connected = tokio::select! {
            result = channel::connect(&endpoint) => result,
            _ = shutdown_rx.changed() => break,
        };

        match connected {
            Ok((writer_half, mut reader)) => {
                attempt = 0;
                last_error = None;
                *writer.lock().await = Some(writer_half);
                publish(ConnectionStatus::Open, 0, None);
                info!(endpoint = %endpoint, "channel open");

                loop {
                    tokio::select! {
                        frame = reader.next() => match frame {
                            Some(envelope) => {
                                let _ = frames.send(envelope);
                            }
                            None => break,
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                }

                if let Some(mut writer_half) = writer.lock().await.take() {
                    writer_half.close().await;
                }

                if *shutdown_rx.borrow() {
                    break;
                }
                last_error = Some("connection closed".to_string());
                publish(ConnectionStatus::Disconnected, attempt, last_error.clone());
                warn!(endpoint = %endpoint, "channel closed unexpectedly");
            }
            Err(err) => {
                last_error = Some(err.to_string());
                debug!(endpoint = %endpoint, error = %err, "connect failed");
            }
        }

        attempt += 1;
        if attempt >= policy.max_attempts {
            publish(ConnectionStatus::Dormant, attempt, last_error.clone());
            info!(endpoint = %endpoint, attempt, "retries exhausted; dormant until resume");
            while resume_rx.try_recv().is_ok() {}
            tokio::select! {
                signal = resume_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    info!(endpoint = %endpoint, "resume requested");
                }
                _ = shutdown_rx.changed() => break,
            }
            continue;
        }

        let delay = policy.delay_for(attempt);
        publish(ConnectionStatus::Backoff, attempt, last_error.clone());
        debug!(
            endpoint = %endpoint,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        while resume_rx.try_recv().is_ok() {}
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            signal = resume_rx.recv() => {
                if signal.is_none() {
                    break;
                }
                debug!(endpoint = %endpoint, "resume requested; skipping backoff");
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    publish(ConnectionStatus::Closed, attempt, last_error);
    debug!(endpoint = %endpoint, "supervisor stopped");
}

#[cfg(test)]
#[path = "tests/reconnect_tests.rs"]
mod tests;
