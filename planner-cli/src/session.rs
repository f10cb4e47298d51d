//! Headless sync sessions against a running server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use log::{info, warn};

use planner_core::budget::{format_money, summarize};
use planner_core::edit::DocumentEdit;
use planner_sync::blob::{attach_pdf, BlobStore, FsBlobStore};
use planner_sync::client::{ClientConfig, SyncClient};
use planner_sync::local::{resolve_client_id, FileStore};
use planner_sync::protocol::RoomId;
use planner_sync::reconcile::FlushReason;
use planner_sync::session::{SessionConfig, SessionHandle, SyncSession};

use crate::{CliResult, LocalArgs};

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Sync server URL; a `room` query parameter selects the room
    #[arg(short, long, default_value = "ws://127.0.0.1:9090")]
    pub server: String,

    /// Room to join, overriding the URL's `room` parameter
    #[arg(short, long)]
    pub room: Option<String>,

    /// Debounce window for write-back, in milliseconds
    #[arg(long, default_value_t = 600)]
    pub debounce_ms: u64,

    #[command(flatten)]
    pub local: LocalArgs,
}

impl SessionArgs {
    fn room(&self) -> RoomId {
        match &self.room {
            Some(name) => RoomId::new(name),
            None => RoomId::from_url(&self.server),
        }
    }
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// New total budget
    #[arg(long)]
    pub total_budget: Option<f64>,

    /// New card balance
    #[arg(long)]
    pub card_balance: Option<f64>,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// PDF to upload
    pub pdf: PathBuf,

    /// Text extracted from the PDF, used to find the requested total
    #[arg(long)]
    pub text: Option<PathBuf>,

    /// Directory blobs are stored under
    #[arg(long, default_value = ".planner/blobs")]
    pub blob_dir: PathBuf,

    /// Public URL prefix for stored blobs
    #[arg(long)]
    pub blob_url: Option<String>,
}

async fn start(args: &SessionArgs) -> Result<(SessionHandle, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
    let store = FileStore::open(&args.local.data_dir)?;
    let client_id = resolve_client_id(&store);
    let client = SyncClient::connect(args.server.as_str(), client_id.clone(), ClientConfig::default()).await?;

    let config = SessionConfig {
        room: args.room(),
        debounce: Duration::from_millis(args.debounce_ms),
        ..SessionConfig::default()
    };
    info!("Joining room {} as {client_id}", config.room);
    let started = SyncSession::spawn(Arc::new(client), store, client_id, config).await?;
    Ok(started)
}

/// How long `set` and `attach` wait for the room's snapshot.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait until the session has taken the room's snapshot (or seeded it).
/// Editing before that would overwrite the room with this device's copy.
async fn settle(session: &SessionHandle) -> CliResult {
    match tokio::time::timeout(JOIN_TIMEOUT, session.joined()).await {
        Ok(joined) => Ok(joined?),
        Err(_) => {
            let _ = session.shutdown().await;
            Err(format!(
                "no snapshot from room {} within {}s; nothing changed",
                session.room(),
                JOIN_TIMEOUT.as_secs()
            )
            .into())
        }
    }
}

pub async fn watch(args: SessionArgs) -> CliResult {
    let (session, join) = start(&args).await?;
    let mut changes = session.subscribe();

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("Session stopped");
                    break;
                }
                let state = changes.borrow_and_update().clone();
                let summary = summarize(&state.document);
                println!(
                    "{} event(s) | budget {} | spent {} | remaining {} | slide {}",
                    summary.event_count,
                    format_money(summary.total_budget),
                    format_money(summary.spent),
                    format_money(summary.remaining),
                    state.ui.slide_title()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                session.flush(FlushReason::Unload).await?;
                break;
            }
        }
    }

    if let Ok(stats) = session.shutdown().await {
        info!("Session stats: {stats:?}");
    }
    let _ = join.await;
    Ok(())
}

pub async fn set(args: SetArgs) -> CliResult {
    let (session, join) = start(&args.session).await?;
    settle(&session).await?;

    if let Some(total) = args.total_budget {
        session.edit(DocumentEdit::SetTotalBudget(total)).await?;
    }
    if let Some(balance) = args.card_balance {
        session.edit(DocumentEdit::SetCardBalance(balance)).await?;
    }

    let stats = session.shutdown().await?;
    let _ = join.await;
    if stats.writes_failed > 0 {
        return Err(format!("{} write(s) failed", stats.writes_failed).into());
    }
    let summary = summarize(&session.state().document);
    println!(
        "Budget {} | card {}",
        format_money(summary.total_budget),
        format_money(summary.card_balance)
    );
    Ok(())
}

pub async fn attach(args: AttachArgs) -> CliResult {
    let blobs = match &args.blob_url {
        Some(url) => FsBlobStore::with_base_url(&args.blob_dir, url)?,
        None => FsBlobStore::new(&args.blob_dir),
    };
    let file_name = args
        .pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or("PDF path has no file name")?;
    let bytes = tokio::fs::read(&args.pdf).await?;
    let text = match &args.text {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    let room = args.session.room();
    let blob = blobs.upload(&room, &file_name, &bytes).await?;
    let pdf = attach_pdf(blob, &file_name, None, text.as_deref());
    println!(
        "Uploaded {} ({})",
        pdf.title,
        pdf.extracted_total
            .map(format_money)
            .unwrap_or_else(|| "no total found".to_string())
    );

    let (session, join) = start(&args.session).await?;
    settle(&session).await?;
    session.edit(DocumentEdit::AddPdf(pdf)).await?;
    session.shutdown().await?;
    let _ = join.await;
    Ok(())
}
