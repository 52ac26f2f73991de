//! # Centronic CLI
//!
//! Drives Becker shutters through the Centronic USB stick.
//!
//! ```bash
//! # pair unit 1, channel 1 with a receiver in pairing mode
//! centronic -c 1:1 -a PAIR
//!
//! # move it down, then half-way up for 10 seconds
//! centronic -c 1:1 -a DOWN
//! centronic -c 1:1 -a UP:10
//!
//! # watch frames from hand-held remotes for a minute
//! centronic -l 60
//! ```

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use centronic_core::engine::Centronic;
use centronic_core::communicator::FrameCallback;
use centronic_core::protocol::{Action, ReceivedFrame};
use centronic_core::store::{UnitKey, UnitStore, STORE_FILE};

#[derive(Parser, Debug)]
#[command(name = "centronic")]
#[command(about = "Becker Centronic shutter control", long_about = None)]
#[command(version)]
struct Cli {
    /// Channel address: "<unit>:<channel>" or a bare channel on unit 1;
    /// unit 0 repeats the command for every configured unit
    #[arg(short, long)]
    channel: Option<String>,

    /// Action to execute: UP, UP2, DOWN, DOWN2, HALT, PAIR, CLEARPOS,
    /// REMOVE, or a timed UP:<secs> / DOWN:<secs>
    #[arg(short, long)]
    action: Option<Action>,

    /// Gateway device: a serial path, COM port or "host[:port]".
    /// Defaults to the stick's udev path
    #[arg(short, long, default_value = "")]
    device: String,

    /// Unit store file
    #[arg(short, long, default_value = STORE_FILE)]
    file: String,

    /// Log received frames for this many seconds
    #[arg(short = 'l', long = "log", value_name = "SECONDS")]
    log_seconds: Option<u64>,

    /// List configured units and exit
    #[arg(long)]
    list: bool,

    /// Register a factory-fresh receiver on the addressed unit
    #[arg(long)]
    init: bool,

    /// Register a new unit code in the store and exit
    #[arg(long, value_name = "CODE")]
    add_unit: Option<String>,

    /// Delete a unit (by code or 1-based index) from the store and exit
    #[arg(long, value_name = "CODE|INDEX")]
    remove_unit: Option<String>,

    /// Transmit as usual but roll back the counter commit (test mode)
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("centronic=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Store-only operations work without a gateway attached.
    if let Some(code) = &cli.add_unit {
        let mut store = UnitStore::open(&cli.file)?;
        store.add_unit(code)?;
        info!(unit = %code, "unit added");
        return Ok(());
    }
    if let Some(key) = &cli.remove_unit {
        let mut store = UnitStore::open(&cli.file)?;
        let key = match key.parse::<usize>() {
            Ok(index) => UnitKey::Index(index),
            Err(_) => UnitKey::Code(key.clone()),
        };
        store.remove_unit(&key)?;
        info!("unit removed");
        return Ok(());
    }
    if cli.list {
        let store = UnitStore::open(&cli.file)?;
        print!("{}", store.format_listing());
        return Ok(());
    }

    if cli.channel.is_none() && cli.log_seconds.is_none() {
        bail!("nothing to do: pass --channel with --action, or --log (see --help)");
    }

    let callback: Option<FrameCallback> = cli
        .log_seconds
        .map(|_| Box::new(|frame: ReceivedFrame| println!("{frame}")) as FrameCallback);

    let mut engine = Centronic::open(&cli.device, &cli.file, callback)?;

    if let Some(channel) = &cli.channel {
        if cli.init {
            engine.init_unconfigured_unit(channel)?;
        } else {
            let action = cli
                .action
                .context("--action is required with --channel")?;
            engine.send(channel, action, cli.dry_run)?;
        }
    }

    if let Some(secs) = cli.log_seconds {
        info!(seconds = secs, "logging received frames");
        thread::sleep(Duration::from_secs(secs));
    }

    engine.close();
    Ok(())
}
