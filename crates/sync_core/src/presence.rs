use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{PresenceState, UserId},
    protocol::{Envelope, PresenceFrame},
};
use tokio::{
    sync::{broadcast, watch, RwLock},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{reconnect::ConnectionStatus, registry::ChannelHandle};

/// Who is currently online. Written only by the tracker task; read anywhere.
#[derive(Clone, Default)]
pub struct PresenceRoster {
    online: Arc<RwLock<HashSet<UserId>>>,
}

impl PresenceRoster {
    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.online.read().await.contains(&user_id)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.online.read().await.iter().copied().collect();
        users.sort();
        users
    }

    async fn apply(&self, frame: &PresenceFrame) -> bool {
        let mut online = self.online.write().await;
        match frame.status {
            PresenceState::Online => online.insert(frame.sender_id),
            PresenceState::Offline => online.remove(&frame.sender_id),
        }
    }

    async fn clear(&self) {
        self.online.write().await.clear();
    }
}

fn beat(viewer_id: UserId, status: PresenceState) -> Envelope {
    Envelope::Presence(PresenceFrame {
        sender_id: viewer_id,
        status,
        timestamp: Utc::now(),
    })
}

/// Applies presence frames off the direct feed and announces the viewer on
/// open and on every heartbeat tick. The roster is cleared whenever the feed
/// leaves the open state; peers' next heartbeats repopulate it.
pub(crate) fn spawn_tracker(
    handle: ChannelHandle,
    roster: PresenceRoster,
    viewer_id: UserId,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut frames = handle.subscribe();
        let mut status = handle.status_stream();
        let mut was_open = status.borrow().status == ConnectionStatus::Open;
        // The first tick fires immediately, covering the initial announce.
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(Envelope::Presence(presence)) => {
                        if roster.apply(&presence).await {
                            debug!(
                                user_id = presence.sender_id.0,
                                status = ?presence.status,
                                "presence updated"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "presence feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    if handle.state().status == ConnectionStatus::Open {
                        if let Err(err) = handle.send(&beat(viewer_id, PresenceState::Online)).await {
                            debug!(error = %err, "presence heartbeat skipped");
                        }
                    }
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_open = status.borrow().status == ConnectionStatus::Open;
                    if was_open && !now_open {
                        roster.clear().await;
                        debug!("direct feed no longer open; presence roster cleared");
                    }
                    if now_open && !was_open {
                        if let Err(err) = handle.send(&beat(viewer_id, PresenceState::Online)).await {
                            debug!(error = %err, "presence announce skipped");
                        }
                    }
                    was_open = now_open;
                },
                _ = shutdown.changed() => {
                    // Best-effort offline note before the feed closes.
                    let _ = handle.send(&beat(viewer_id, PresenceState::Offline)).await;
                    break;
                }
            }
        }
        debug!("presence tracker stopped");
    })
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
