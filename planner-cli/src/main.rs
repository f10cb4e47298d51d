//! `planner` — command-line front end for the event planner.
//!
//! Runs the sync server, drives headless sync sessions against it and
//! works with the device-local state (export, import, budget report).
//! Logging is controlled with `RUST_LOG`.

mod session;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::info;

use planner_core::budget::{format_money, summarize};
use planner_core::transfer::{export_to_path, import_from_path, EXPORT_FILE_NAME};
use planner_sync::local::{FileStore, LocalStore};
use planner_sync::server::{ServerConfig, SyncServer};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "planner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket sync server
    Serve(ServeArgs),

    /// Follow a room and log every change until Ctrl-C
    Watch(session::SessionArgs),

    /// Change the shared budget figures through a sync session
    Set(session::SetArgs),

    /// Upload a PDF and add it to the PDF wall
    Attach(session::AttachArgs),

    /// Write the local state to a JSON file
    Export {
        #[command(flatten)]
        local: LocalArgs,
        /// Output file
        #[arg(short, long, default_value = EXPORT_FILE_NAME)]
        out: PathBuf,
    },

    /// Replace the local state with a JSON export
    Import {
        #[command(flatten)]
        local: LocalArgs,
        /// Exported JSON file
        file: PathBuf,
    },

    /// Print the budget summary of the local state
    Budget(LocalArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    bind: String,

    /// RocksDB directory; rooms live in memory only when omitted
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// Maximum clients per room
    #[arg(long, default_value_t = 100)]
    max_peers: usize,

    /// Do not relay writes back to their author
    #[arg(long)]
    no_echo: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Directory holding the local state and client id
    #[arg(short, long, default_value = ".planner")]
    pub data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Watch(args) => session::watch(args).await,
        Command::Set(args) => session::set(args).await,
        Command::Attach(args) => session::attach(args).await,
        Command::Export { local, out } => export(local, out),
        Command::Import { local, file } => import(local, file),
        Command::Budget(local) => budget(local),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn serve(args: ServeArgs) -> CliResult {
    let config = ServerConfig {
        bind_addr: args.bind,
        storage_path: args.storage,
        max_peers_per_room: args.max_peers,
        echo_to_author: !args.no_echo,
        ..ServerConfig::default()
    };
    let server = SyncServer::new(config)?;
    info!("Starting sync server on {}", server.bind_addr());

    tokio::select! {
        result = server.run() => result.map_err(|e| -> Box<dyn std::error::Error> { e }),
        _ = tokio::signal::ctrl_c() => {
            server.shutdown();
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connection(s), {} write(s) accepted, {} rejected",
                stats.total_connections, stats.writes_accepted, stats.writes_rejected
            );
            Ok(())
        }
    }
}

fn export(local: LocalArgs, out: PathBuf) -> CliResult {
    let store = FileStore::open(&local.data_dir)?;
    export_to_path(&store.load(), &out)?;
    println!("Exported to {}", out.display());
    Ok(())
}

fn import(local: LocalArgs, file: PathBuf) -> CliResult {
    let state = import_from_path(&file)?;
    let store = FileStore::open(&local.data_dir)?;
    store.save(&state)?;
    println!(
        "Imported {} event(s) into {}",
        state.document.events.len(),
        store.state_path().display()
    );
    Ok(())
}

fn budget(local: LocalArgs) -> CliResult {
    let store = FileStore::open(&local.data_dir)?;
    let state = store.load();
    let summary = summarize(&state.document);

    println!("Total budget   {:>14}", format_money(summary.total_budget));
    println!("Spent          {:>14}", format_money(summary.spent));
    println!("Remaining      {:>14}", format_money(summary.remaining));
    println!("Card balance   {:>14}", format_money(summary.card_balance));
    println!("PDF requests   {:>14}", format_money(summary.pdf_wall_total));
    println!("Events         {:>14}", summary.event_count);
    Ok(())
}
