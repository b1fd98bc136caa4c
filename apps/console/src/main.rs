use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use shared::domain::{Context, EventId, GroupId, UserId};
use sync_core::{
    backend::HttpSyncBackend,
    config::load_settings,
    log::{Delivery, LogEntry},
    SyncClient,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// HTTP endpoint of the sync service; overrides sync.toml and env.
    #[arg(long)]
    service_url: Option<String>,
    /// Streaming endpoint when it differs from the service url.
    #[arg(long)]
    stream_url: Option<String>,
    /// Follow a group conversation.
    #[arg(long, conflicts_with_all = ["event", "peer"])]
    group: Option<i64>,
    /// Follow an event conversation and its RSVP tally.
    #[arg(long, conflicts_with_all = ["group", "peer"])]
    event: Option<i64>,
    /// Follow a private conversation with this user.
    #[arg(long, conflicts_with_all = ["group", "event"])]
    peer: Option<i64>,
}

impl Args {
    fn context(&self) -> Option<Context> {
        if let Some(id) = self.group {
            Some(Context::Group(GroupId(id)))
        } else if let Some(id) = self.event {
            Some(Context::Event(EventId(id)))
        } else {
            self.peer.map(|id| Context::Private(UserId(id)))
        }
    }
}

fn describe(entry: &LogEntry) -> String {
    let marker = match entry.delivery {
        Delivery::Pending => "…",
        Delivery::Confirmed => " ",
        Delivery::Failed => "!",
    };
    format!(
        "[{marker}] {} {}: {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.sender_id.0,
        entry.content
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.service_url.clone() {
        settings.service_url = url;
    }
    if let Some(url) = args.stream_url.clone() {
        settings.stream_url = Some(url);
    }

    let backend = Arc::new(HttpSyncBackend::new(settings.service_url.clone()));
    let client = SyncClient::new(backend, settings);
    let identity = client.start().await?;
    println!("Connected as user_id={}", identity.user_id.0);

    let Some(context) = args.context() else {
        println!("Pass --group, --event or --peer to follow a conversation.");
        client.shutdown().await;
        return Ok(());
    };

    let mut log = client.subscribe(context).await?;
    println!("Following {context}; type to send, Ctrl-D to quit.");
    for entry in log.borrow().iter() {
        println!("{}", describe(entry));
    }

    let session = client
        .session(context)
        .await
        .ok_or_else(|| anyhow::anyhow!("no session for {context}"))?;
    let mut status = session.connection_changes();
    let mut rsvp = session.rsvp_changes();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = log.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(entry) = log.borrow().last() {
                    println!("{}", describe(entry));
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = status.borrow().clone();
                println!("-- connection {}", state.status);
            }
            changed = rsvp.changed() => {
                if changed.is_err() {
                    break;
                }
                let tally: Vec<String> = rsvp
                    .borrow()
                    .iter()
                    .map(|entry| format!("{}={:?}", entry.user_id.0, entry.status))
                    .collect();
                println!("-- rsvp {}", tally.join(" "));
            }
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    if let Err(rejection) = client.send(context, line.trim()).await {
                        warn!(error = %rejection, "send failed");
                        println!("-- send failed, text kept: {}", rejection.content);
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
