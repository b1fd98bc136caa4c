use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{ClientRef, Context, Identity},
    protocol::{ChatFrame, ChatTarget, Envelope, RsvpEntry, SendMessageRequest},
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendError, SyncBackend},
    config::SyncSettings,
    error::{SendErrorKind, SendRejection},
    log::{Delivery, LogEntry, MergeOutcome, MessageLog},
    reconnect::{ConnectionState, ConnectionStatus},
    registry::ChannelHandle,
    router::{IgnoreReason, MessageRouter, RouteDecision},
    rsvp::RsvpAggregate,
};

pub struct Session {
    context: Context,
    identity: Identity,
    channel: ChannelHandle,
    backend: Arc<dyn SyncBackend>,
    log: Mutex<MessageLog>,
    log_changes: watch::Sender<Vec<LogEntry>>,
    rsvp: Option<Mutex<RsvpAggregate>>,
    rsvp_changes: watch::Sender<Vec<RsvpEntry>>,
    history_limit: u32,
    pending_timeout: Duration,
    shutdown: watch::Sender<bool>,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Seeds state from the collaborators, then attaches the router to the
    /// channel's frame stream. The subscription is taken before seeding, so
    /// frames broadcast in between are buffered and merged afterwards.
    pub(crate) async fn open(
        context: Context,
        identity: Identity,
        backend: Arc<dyn SyncBackend>,
        channel: ChannelHandle,
        settings: &SyncSettings,
    ) -> Result<Arc<Self>, BackendError> {
        let frames = channel.subscribe();

        let history = backend
            .fetch_history(context, settings.history_seed_limit, None)
            .await?;
        let mut log = MessageLog::default();
        log.seed(history);
        info!(context = %context, entries = log.len(), "session seeded");

        let rsvp = match context {
            Context::Event(event_id) => {
                let mut aggregate = RsvpAggregate::new(event_id, identity.user_id);
                let entries = backend.fetch_event_responses(event_id).await?;
                aggregate.merge_snapshot(&entries);
                Some(aggregate)
            }
            _ => None,
        };

        let (log_changes, _) = watch::channel(log.snapshot());
        let (rsvp_changes, _) = watch::channel(
            rsvp.as_ref().map(RsvpAggregate::snapshot).unwrap_or_default(),
        );
        let (shutdown, _) = watch::channel(false);

        let session = Arc::new(Self {
            context,
            identity,
            channel,
            backend,
            log: Mutex::new(log),
            log_changes,
            rsvp: rsvp.map(Mutex::new),
            rsvp_changes,
            history_limit: settings.history_seed_limit,
            pending_timeout: settings.pending_timeout(),
            shutdown,
            router_task: Mutex::new(None),
        });

        let task = session.clone().spawn_router(frames);
        *session.router_task.lock().await = Some(task);
        Ok(session)
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn log_changes(&self) -> watch::Receiver<Vec<LogEntry>> {
        self.log_changes.subscribe()
    }

    /// Aggregate snapshots; stays at its initial empty value for sessions
    /// without an event context.
    pub fn rsvp_changes(&self) -> watch::Receiver<Vec<RsvpEntry>> {
        self.rsvp_changes.subscribe()
    }

    pub async fn log_snapshot(&self) -> Vec<LogEntry> {
        self.log.lock().await.snapshot()
    }

    pub fn connection(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.channel.status_stream()
    }

    /// Optimistic send: the entry lands provisionally before any network
    /// call, the channel transmit is best effort, and the durable write
    /// decides between confirmation and rollback.
    pub async fn send(self: &Arc<Self>, content: &str) -> Result<LogEntry, SendRejection> {
        let client_ref = ClientRef::generate();
        let timestamp = Utc::now();
        {
            let mut log = self.log.lock().await;
            log.insert_pending(LogEntry {
                server_id: None,
                client_ref: Some(client_ref.clone()),
                sender_id: self.identity.user_id,
                content: content.to_string(),
                timestamp,
                delivery: Delivery::Pending,
            });
            self.publish_log(&log);
        }
        debug!(context = %self.context, client_ref = %client_ref, "provisional entry recorded");

        let envelope = Envelope::Chat(ChatFrame {
            sender_id: self.identity.user_id,
            target: ChatTarget::for_context(self.context),
            content: content.to_string(),
            server_id: None,
            client_ref: Some(client_ref.clone()),
            timestamp,
        });
        if let Err(err) = self.channel.send(&envelope).await {
            // Not queued anywhere; the durable write below is the delivery path.
            debug!(context = %self.context, error = %err, "channel transmit skipped");
        }

        self.spawn_watchdog(client_ref.clone());

        let request = SendMessageRequest {
            sender_id: self.identity.user_id,
            target: ChatTarget::for_context(self.context),
            content: content.to_string(),
            client_ref: client_ref.clone(),
        };
        match self.backend.send_message(request).await {
            Ok(record) => {
                let mut log = self.log.lock().await;
                let outcome = log.merge_confirmed(&record);
                self.publish_log(&log);
                debug!(
                    context = %self.context,
                    server_id = record.server_id.0,
                    ?outcome,
                    "send confirmed"
                );
                Ok(log
                    .find_by_server_id(record.server_id)
                    .cloned()
                    .unwrap_or_else(|| LogEntry::from_record(&record)))
            }
            Err(err) => {
                let restored = {
                    let mut log = self.log.lock().await;
                    let restored = log.roll_back(&client_ref);
                    self.publish_log(&log);
                    restored
                };
                warn!(context = %self.context, error = %err, "durable write failed; rolled back");
                let reason = match err {
                    BackendError::Api(api) if api.is_permission() => {
                        SendErrorKind::Permission(api)
                    }
                    other => SendErrorKind::Backend(other),
                };
                Err(SendRejection::new(
                    restored.unwrap_or_else(|| content.to_string()),
                    reason,
                ))
            }
        }
    }

    fn spawn_watchdog(self: &Arc<Self>, client_ref: ClientRef) {
        let session = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let timeout = self.pending_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let mut log = session.log.lock().await;
                    if log.mark_failed(&client_ref) {
                        warn!(
                            context = %session.context,
                            client_ref = %client_ref,
                            "pending send timed out"
                        );
                        session.publish_log(&log);
                    }
                }
                _ = shutdown.changed() => {}
            }
        });
    }

    fn spawn_router(self: Arc<Self>, mut frames: broadcast::Receiver<Envelope>) -> JoinHandle<()> {
        let router = MessageRouter::new(self.context, self.identity.user_id);
        let mut status = self.channel.status_stream();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ever_open = status.borrow().status == ConnectionStatus::Open;
            loop {
                tokio::select! {
                    frame = frames.recv() => match frame {
                        Ok(envelope) => self.dispatch(&router, envelope).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(context = %self.context, skipped, "frame stream lagged; resyncing");
                            self.resync().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_open = status.borrow().status == ConnectionStatus::Open;
                        if now_open && ever_open {
                            self.resync().await;
                        }
                        if now_open {
                            ever_open = true;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!(context = %self.context, "session router stopped");
        })
    }

    async fn dispatch(&self, router: &MessageRouter, envelope: Envelope) {
        match router.route(envelope) {
            RouteDecision::Chat(record) => {
                let mut log = self.log.lock().await;
                match log.merge_confirmed(&record) {
                    MergeOutcome::Duplicate => {
                        debug!(
                            context = %self.context,
                            server_id = record.server_id.0,
                            "duplicate frame ignored"
                        );
                    }
                    outcome => {
                        debug!(
                            context = %self.context,
                            server_id = record.server_id.0,
                            ?outcome,
                            "frame merged"
                        );
                        self.publish_log(&log);
                    }
                }
            }
            RouteDecision::Rsvp { user_id, status } => {
                if let Some(state) = &self.rsvp {
                    let mut aggregate = state.lock().await;
                    if aggregate.apply_update(user_id, status) {
                        self.rsvp_changes.send_replace(aggregate.snapshot());
                        debug!(
                            context = %self.context,
                            user_id = user_id.0,
                            ?status,
                            "rsvp updated"
                        );
                    }
                }
            }
            RouteDecision::Ignore(IgnoreReason::MissingServerId) => {
                warn!(context = %self.context, "chat frame without server id discarded");
            }
            RouteDecision::Ignore(reason) => {
                debug!(context = %self.context, ?reason, "frame ignored");
            }
        }
    }

    /// Gap recovery after a reopen or a lagged stream: refetch history since
    /// the newest confirmed entry and merge through the idempotent rules.
    async fn resync(&self) {
        let since = self.log.lock().await.latest_confirmed_at();
        match self
            .backend
            .fetch_history(self.context, self.history_limit, since)
            .await
        {
            Ok(records) => {
                let mut log = self.log.lock().await;
                let mut changed = false;
                for record in &records {
                    changed |= log.merge_confirmed(record) != MergeOutcome::Duplicate;
                }
                if changed {
                    self.publish_log(&log);
                }
                info!(context = %self.context, fetched = records.len(), changed, "resynced");
            }
            Err(err) => {
                warn!(context = %self.context, error = %err, "history resync failed");
            }
        }

        if let Some(state) = &self.rsvp {
            let event_id = { state.lock().await.event_id() };
            match self.backend.fetch_event_responses(event_id).await {
                Ok(entries) => {
                    let mut aggregate = state.lock().await;
                    if aggregate.merge_snapshot(&entries) {
                        self.rsvp_changes.send_replace(aggregate.snapshot());
                    }
                }
                Err(err) => {
                    warn!(context = %self.context, error = %err, "rsvp resync failed");
                }
            }
        }
    }

    fn publish_log(&self, log: &MessageLog) {
        self.log_changes.send_replace(log.snapshot());
    }

    /// Stops the router and watchdogs; late frames have no observer left.
    pub(crate) async fn close(&self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.router_task.lock().await.take() {
            task.abort();
        }
        debug!(context = %self.context, "session closed");
    }
}
