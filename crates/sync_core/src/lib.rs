use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{
    domain::{Context, EventId, Identity},
    protocol::RsvpEntry,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod log;
pub mod presence;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod rsvp;
pub mod session;

use crate::{
    backend::SyncBackend,
    config::SyncSettings,
    error::{ClientError, SendErrorKind, SendRejection},
    log::LogEntry,
    presence::PresenceRoster,
    reconnect::ConnectionState,
    registry::{ChannelKey, ChannelRegistry},
    session::Session,
};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Composition root. One instance per signed-in user; sessions hang off it
/// keyed by context and share channels through the registry.
pub struct SyncClient {
    backend: Arc<dyn SyncBackend>,
    settings: SyncSettings,
    registry: ChannelRegistry,
    sessions: Mutex<HashMap<Context, Arc<Session>>>,
    identity: Mutex<Option<Identity>>,
    presence: PresenceRoster,
    presence_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl SyncClient {
    pub fn new(backend: Arc<dyn SyncBackend>, settings: SyncSettings) -> Arc<Self> {
        let registry = ChannelRegistry::new(settings.stream_base(), settings.reconnect_policy());
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            backend,
            settings,
            registry,
            sessions: Mutex::new(HashMap::new()),
            identity: Mutex::new(None),
            presence: PresenceRoster::default(),
            presence_task: Mutex::new(None),
            shutdown,
        })
    }

    /// Resolves the viewer identity, opens the shared direct feed, and starts
    /// the presence tracker on it. Idempotent; later calls return the cached
    /// identity.
    pub async fn start(&self) -> Result<Identity, ClientError> {
        let mut identity_slot = self.identity.lock().await;
        if let Some(existing) = *identity_slot {
            return Ok(existing);
        }

        let identity = self.backend.resolve_identity().await?;
        let handle = self
            .registry
            .open(ChannelKey::Direct, identity.user_id)
            .await?;
        let tracker = presence::spawn_tracker(
            handle,
            self.presence.clone(),
            identity.user_id,
            self.settings.presence_interval(),
            self.shutdown.subscribe(),
        );
        *self.presence_task.lock().await = Some(tracker);
        *identity_slot = Some(identity);
        info!(user_id = identity.user_id.0, "sync client started");
        Ok(identity)
    }

    pub async fn identity(&self) -> Option<Identity> {
        *self.identity.lock().await
    }

    /// Opens (or reuses) the session for `context` and returns its log
    /// snapshot stream. The current snapshot is readable immediately.
    pub async fn subscribe(
        &self,
        context: Context,
    ) -> Result<watch::Receiver<Vec<LogEntry>>, ClientError> {
        Ok(self.ensure_session(context).await?.log_changes())
    }

    /// RSVP aggregate stream for an event, opening the event session if none
    /// is active.
    pub async fn subscribe_rsvp(
        &self,
        event_id: EventId,
    ) -> Result<watch::Receiver<Vec<RsvpEntry>>, ClientError> {
        Ok(self
            .ensure_session(Context::Event(event_id))
            .await?
            .rsvp_changes())
    }

    /// Optimistic send into an active session. The rejection carries the
    /// original content back on any failure.
    pub async fn send(&self, context: Context, content: &str) -> Result<LogEntry, SendRejection> {
        match self.session(context).await {
            Some(session) => session.send(content).await,
            None => Err(SendRejection::new(
                content,
                SendErrorKind::NoSession(context),
            )),
        }
    }

    pub async fn connection_status(&self, context: Context) -> ConnectionState {
        match self.session(context).await {
            Some(session) => session.connection(),
            None => ConnectionState::default(),
        }
    }

    pub async fn connection_changes(
        &self,
        context: Context,
    ) -> Option<watch::Receiver<ConnectionState>> {
        Some(self.session(context).await?.connection_changes())
    }

    pub async fn session(&self, context: Context) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&context).cloned()
    }

    pub fn presence(&self) -> PresenceRoster {
        self.presence.clone()
    }

    /// Wakes every backing-off or dormant channel for an immediate attempt.
    pub async fn resume(&self) {
        self.registry.resume_all().await;
        info!("resume requested for all channels");
    }

    /// Tears down the session for `context` and releases its channel
    /// attachment.
    pub async fn close(&self, context: Context) {
        let session = { self.sessions.lock().await.remove(&context) };
        if let Some(session) = session {
            session.close().await;
            self.registry.close(ChannelKey::for_context(context)).await;
            info!(context = %context, "session closed");
        }
    }

    /// Full teardown: the presence tracker gets a moment to put its offline
    /// beat on the wire, then every session and channel is stopped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(tracker) = self.presence_task.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, tracker).await;
        }

        let drained: Vec<_> = { self.sessions.lock().await.drain().collect() };
        for (context, session) in drained {
            session.close().await;
            self.registry.close(ChannelKey::for_context(context)).await;
        }
        self.registry.shutdown().await;
        info!("sync client shut down");
    }

    async fn ensure_session(&self, context: Context) -> Result<Arc<Session>, ClientError> {
        let identity = match *self.identity.lock().await {
            Some(identity) => identity,
            None => return Err(ClientError::NotStarted),
        };

        if let Some(existing) = self.sessions.lock().await.get(&context) {
            return Ok(existing.clone());
        }

        // The seed fetch runs with the sessions lock released; other contexts
        // keep operating while this one opens.
        let key = ChannelKey::for_context(context);
        let handle = self.registry.open(key, identity.user_id).await?;
        let session = match Session::open(
            context,
            identity,
            Arc::clone(&self.backend),
            handle,
            &self.settings,
        )
        .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(context = %context, error = %err, "session open failed");
                self.registry.close(key).await;
                return Err(err.into());
            }
        };

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&context) {
            // A concurrent open for the same context won the insert.
            let existing = existing.clone();
            drop(sessions);
            session.close().await;
            self.registry.close(key).await;
            return Ok(existing);
        }
        sessions.insert(context, session.clone());
        info!(context = %context, "session opened");
        Ok(session)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
