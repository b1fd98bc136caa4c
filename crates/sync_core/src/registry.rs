use std::{collections::HashMap, fmt, sync::Arc};

use shared::{
    domain::{Context, EventId, GroupId, UserId},
    protocol::Envelope,
};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info};
use url::Url;

use crate::{
    error::TransportError,
    reconnect::{ConnectionState, ReconnectPolicy, ReconnectSupervisor, WriterSlot},
};

const FRAME_BUFFER: usize = 256;

/// Private contexts and the presence feed share the one `Direct` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Group(GroupId),
    Event(EventId),
    Direct,
}

impl ChannelKey {
    pub fn for_context(context: Context) -> Self {
        match context {
            Context::Group(id) => ChannelKey::Group(id),
            Context::Event(id) => ChannelKey::Event(id),
            Context::Private(_) => ChannelKey::Direct,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Group(id) => write!(f, "group:{}", id.0),
            ChannelKey::Event(id) => write!(f, "event:{}", id.0),
            ChannelKey::Direct => f.write_str("direct"),
        }
    }
}

fn stream_base(raw: &str) -> Result<String, TransportError> {
    let base = if raw.starts_with("ws://") || raw.starts_with("wss://") {
        raw.to_string()
    } else if raw.starts_with("https://") {
        raw.replacen("https://", "wss://", 1)
    } else if raw.starts_with("http://") {
        raw.replacen("http://", "ws://", 1)
    } else {
        return Err(TransportError::Connect(format!(
            "stream url must start with http(s):// or ws(s)://, got '{raw}'"
        )));
    };
    Ok(base.trim_end_matches('/').to_string())
}

pub(crate) fn endpoint_url(
    raw_base: &str,
    key: ChannelKey,
    viewer: UserId,
) -> Result<String, TransportError> {
    let base = stream_base(raw_base)?;
    let endpoint = match key {
        ChannelKey::Group(id) => format!("{base}/ws/groups/{}", id.0),
        ChannelKey::Event(id) => format!("{base}/ws/events/{}", id.0),
        ChannelKey::Direct => format!("{base}/ws/direct?user_id={}", viewer.0),
    };
    Url::parse(&endpoint).map_err(|err| TransportError::Connect(err.to_string()))?;
    Ok(endpoint)
}

struct ChannelSlot {
    supervisor: ReconnectSupervisor,
    writer: WriterSlot,
    frames: broadcast::Sender<Envelope>,
    attachments: usize,
}

/// Shared access to one live channel: send on the writer slot, subscribe to
/// the frame broadcast, observe connection state.
#[derive(Clone)]
pub struct ChannelHandle {
    key: ChannelKey,
    writer: WriterSlot,
    frames: broadcast::Sender<Envelope>,
    status: watch::Receiver<ConnectionState>,
}

impl ChannelHandle {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.frames.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().clone()
    }

    pub fn status_stream(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Sends on the live socket. Rejected immediately when the channel is not
    /// open; nothing is ever queued here, retry belongs to the durable path.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.send(envelope).await,
            None => Err(TransportError::NotOpen),
        }
    }
}

pub struct ChannelRegistry {
    stream_url: String,
    policy: ReconnectPolicy,
    slots: Mutex<HashMap<ChannelKey, ChannelSlot>>,
}

impl ChannelRegistry {
    pub fn new(stream_url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            stream_url: stream_url.into(),
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a handle to the live channel for `key`, starting one if none
    /// exists. Every `open` must be paired with one `close`.
    pub async fn open(
        &self,
        key: ChannelKey,
        viewer: UserId,
    ) -> Result<ChannelHandle, TransportError> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&key) {
            slot.attachments += 1;
            debug!(channel = %key, attachments = slot.attachments, "attached to live channel");
            return Ok(Self::handle(key, slot));
        }

        let endpoint = endpoint_url(&self.stream_url, key, viewer)?;
        let writer: WriterSlot = Arc::new(Mutex::new(None));
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let supervisor =
            ReconnectSupervisor::spawn(endpoint, self.policy, writer.clone(), frames.clone());
        let slot = ChannelSlot {
            supervisor,
            writer,
            frames,
            attachments: 1,
        };
        let handle = Self::handle(key, &slot);
        slots.insert(key, slot);
        info!(channel = %key, "channel opened");
        Ok(handle)
    }

    fn handle(key: ChannelKey, slot: &ChannelSlot) -> ChannelHandle {
        ChannelHandle {
            key,
            writer: slot.writer.clone(),
            frames: slot.frames.clone(),
            status: slot.supervisor.status(),
        }
    }

    /// Detaches one attachment; the channel is torn down (supervisor stopped,
    /// timers cancelled, broadcast dropped) when the last one goes.
    pub async fn close(&self, key: ChannelKey) {
        let removed = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(&key) {
                Some(slot) if slot.attachments > 1 => {
                    slot.attachments -= 1;
                    debug!(channel = %key, attachments = slot.attachments, "detached from channel");
                    None
                }
                Some(_) => slots.remove(&key),
                None => None,
            }
        };
        if let Some(slot) = removed {
            slot.supervisor.shutdown().await;
            info!(channel = %key, "channel closed");
        }
    }

    pub async fn status(&self, key: ChannelKey) -> Option<watch::Receiver<ConnectionState>> {
        let slots = self.slots.lock().await;
        slots.get(&key).map(|slot| slot.supervisor.status())
    }

    pub async fn resume_all(&self) {
        let slots = self.slots.lock().await;
        for slot in slots.values() {
            slot.supervisor.resume();
        }
    }

    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut slots = self.slots.lock().await;
            slots.drain().collect()
        };
        for (key, slot) in drained {
            slot.supervisor.shutdown().await;
            debug!(channel = %key, "channel closed");
        }
    }

    #[cfg(test)]
    pub(crate) async fn live_channels(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
