//! watchpost_settings - inspect or change the persisted detection settings
//!
//! Writes go through the same validation and atomic replace as the HTTP
//! endpoint, so a running daemon picks the change up on its next frame.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use watchpost::settings::{DetectionMode, FileSettingsStore, SettingsProvider, SettingsUpdate};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the settings record.
    #[arg(long, env = "WATCHPOST_SETTINGS", default_value = "settings.json")]
    settings: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current settings as JSON.
    Show,
    /// Update one or both fields.
    Set {
        /// Detection mode (motion|ai).
        #[arg(long)]
        mode: Option<DetectionMode>,
        /// Minimum motion area in hundreds of pixels (1-1000).
        #[arg(long)]
        sensitivity: Option<u32>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let store = FileSettingsStore::open_or_init(&args.settings)?;
    match args.command {
        Command::Show => {}
        Command::Set { mode, sensitivity } => {
            let next = store.current()?.apply(&SettingsUpdate {
                detection_mode: mode,
                sensitivity,
            })?;
            store.update(next)?;
            log::info!("settings written to {}", store.path().display());
        }
    }
    println!("{}", serde_json::to_string_pretty(&store.current()?)?);
    Ok(())
}
