//! realm-client binary
//!
//! Lists the worlds advertised in a directory snapshot, or resolves one
//! world's connection address.
//!
//! ## Configuration
//!
//! | Flag / env                              | Default | Description                     |
//! |-----------------------------------------|---------|---------------------------------|
//! | `--directory-file` / `REALM_DIRECTORY_FILE` | –   | JSON snapshot of directory keys |
//! | `--config` / `REALM_CONFIG`             | –       | TOML settings file              |
//! | `--world` / `REALM_WORLD`               | –       | Print only this world's address |
//!
//! Settings from the TOML file can be overridden with `REALM_<SECTION>__<KEY>`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use realm_session::{ClientSettings, MemoryDirectoryStore, WorldDirectoryClient};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "realm-client", about = "Realm world directory tool", version)]
struct Args {
    /// JSON object of directory keys to values
    #[arg(long, env = "REALM_DIRECTORY_FILE")]
    directory_file: PathBuf,

    /// Settings file (TOML)
    #[arg(long, env = "REALM_CONFIG")]
    config: Option<PathBuf>,

    /// Resolve the address of this world id
    #[arg(long, env = "REALM_WORLD")]
    world: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("realm_session=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = ClientSettings::load(args.config.as_deref())
        .context("failed to load settings")?;
    tracing::debug!(?settings, "settings loaded");

    let store = MemoryDirectoryStore::from_json_file(&args.directory_file).with_context(|| {
        format!(
            "failed to read directory snapshot {}",
            args.directory_file.display()
        )
    })?;

    let mut directory = WorldDirectoryClient::new(store, settings.directory);
    tracing::info!(
        store = directory.url(),
        snapshot = %args.directory_file.display(),
        "serving directory from snapshot"
    );
    let worlds = directory.fetch_worlds().await;

    if let Some(id) = args.world.as_deref() {
        let Some(url) = directory.world_url(id) else {
            bail!("world '{}' is not advertised", id);
        };
        println!("{}", url);
        return Ok(());
    }

    if worlds.is_empty() {
        log::warn!("No worlds advertised");
    }
    for world in &worlds {
        println!(
            "{:<16} {:<24} {:<12} {:>4}/{:<4} {}",
            world.world_id,
            world.name,
            world.status,
            world.current_players,
            world.max_players,
            realm_session::world_address(world),
        );
    }
    Ok(())
}
