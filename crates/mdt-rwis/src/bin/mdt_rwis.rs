//! MDT RWIS runner
//!
//! Usage:
//!   mdt-rwis setup                 # Add a site (API key, site, interval)
//!   mdt-rwis run                   # Poll all configured sites until Ctrl+C
//!   mdt-rwis snapshot              # Fetch once, print sensor states as JSON
//!   mdt-rwis snapshot -o ./images  # ...and save the current camera JPEGs

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use mdt_rwis::config_flow::{FlowResult, FlowStep, SiteInput, UserInput};
use mdt_rwis::prelude::*;
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Montana DOT road weather stations and cameras
#[derive(FromArgs)]
struct Args {
    /// path to the entry store (default: ~/.config/mdt-rwis/entries.yaml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Setup(SetupArgs),
    Run(RunArgs),
    Snapshot(SnapshotArgs),
}

/// Add a site interactively
#[derive(FromArgs)]
#[argh(subcommand, name = "setup")]
struct SetupArgs {}

/// Poll every configured site until interrupted
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
struct RunArgs {}

/// Fetch each configured site once and print its sensor states
#[derive(FromArgs)]
#[argh(subcommand, name = "snapshot")]
struct SnapshotArgs {
    /// directory to write camera images into
    #[argh(option, short = 'o')]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    mdt_rwis::setup_logging();

    let args: Args = argh::from_env();
    let path = match args.config {
        Some(path) => path,
        None => EntryStore::default_path()?,
    };

    match args.command {
        Command::Setup(_) => run_setup(&path).await,
        Command::Run(_) => run_poll(&path).await,
        Command::Snapshot(cmd) => run_snapshot(&path, cmd.output_dir.as_deref()).await,
    }
}

fn transport() -> Result<Arc<dyn HttpTransport>> {
    Ok(Arc::new(ReqwestTransport::new()?))
}

// ── setup ───────────────────────────────────────────────────────────

async fn run_setup(path: &Path) -> Result<()> {
    let mut store = EntryStore::load_or_default(path)?;
    let mut flow = ConfigFlow::new(transport()?, store.base_url(), &store.entries);

    println!("\n  {} setup\n", mdt_rwis::NAME);

    let mut result = flow.step_user(None).await;
    loop {
        result = match result {
            FlowResult::ShowForm {
                step: FlowStep::User,
                errors,
                ..
            } => {
                for error in errors.values() {
                    println!("  Error: {}", describe(*error));
                }
                let key = rpassword::prompt_password("  Paste your API key: ")
                    .context("this command requires an interactive terminal")?;
                flow.step_user(Some(UserInput { api_key: key })).await
            }
            FlowResult::ShowForm {
                step: FlowStep::Site,
                errors,
                sites,
            } => {
                for (field, error) in &errors {
                    println!("  Error ({}): {}", field, describe(*error));
                }
                println!("\n  Available sites:");
                for (i, site) in sites.iter().enumerate() {
                    println!("  {:>4}. {} ({})", i + 1, site.name, site.id);
                }
                let choice = prompt("\n  Site number or id: ")?;
                let site_id = choice
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| sites.get(i))
                    .map(|s| s.id.clone())
                    .unwrap_or(choice);
                let interval = prompt(&format!(
                    "  Update interval in minutes [{}]: ",
                    mdt_rwis::config::DEFAULT_UPDATE_INTERVAL
                ))?;
                let update_interval = if interval.is_empty() {
                    None
                } else {
                    // Unparseable input is sent as 0 so the flow reports it.
                    Some(interval.parse::<i64>().unwrap_or(0))
                };
                flow.step_site(Some(SiteInput {
                    site_id,
                    update_interval,
                }))
                .await
            }
            FlowResult::CreateEntry {
                title,
                unique_id,
                data,
            } => {
                store.add(ConfigEntry::new(title.clone(), Some(unique_id), data))?;
                store.save(path)?;
                println!("\n  Added {}", title);
                println!("  Saved to {}\n", path.display());
                return Ok(());
            }
            FlowResult::Abort { reason } => bail!("setup aborted: {}", describe(reason)),
        };
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("unexpected end of input");
    }
    Ok(line.trim().to_string())
}

fn describe(error: FlowError) -> &'static str {
    match error {
        FlowError::InvalidAuth => "Invalid API key",
        FlowError::CannotConnect => "Failed to connect to the MDT RWIS API",
        FlowError::Unknown => "Unexpected error",
        FlowError::InvalidSite => "Unknown site",
        FlowError::InvalidUpdateInterval => "Update interval must be between 1 and 60 minutes",
        FlowError::AlreadyConfigured => "This site is already configured",
    }
}

// ── run ─────────────────────────────────────────────────────────────

async fn run_poll(path: &Path) -> Result<()> {
    let store = EntryStore::from_file(path)
        .context("no entries yet, run `mdt-rwis setup` first")?;
    let transport = transport()?;
    let base_url = store.base_url();

    let shutdown_tx = watch::Sender::new(());
    let mut shutdown = shutdown_tx.subscribe();
    {
        let shutdown_tx = shutdown_tx.clone();
        ctrlc::set_handler(move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown_tx.send(());
        })
        .context("failed to set Ctrl+C handler")?;
    }

    let mut loaded = Vec::new();
    for entry in store.entries_for_domain(mdt_rwis::DOMAIN) {
        match setup_entry(entry, transport.clone(), &base_url).await {
            Ok(entry) => loaded.push(entry),
            Err(e) => log::error!("{}", e),
        }
    }
    if loaded.is_empty() {
        bail!("no entries could be set up");
    }

    let reporters: Vec<_> = loaded
        .iter()
        .map(|entry| {
            let sensors = entry.sensors.clone();
            let mut updates = entry.coordinator.subscribe();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                report(&sensors);
                loop {
                    tokio::select! {
                        changed = updates.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            report(&sensors);
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        })
        .collect();

    let _ = shutdown.changed().await;

    for reporter in reporters {
        let _ = reporter.await;
    }
    for entry in loaded {
        entry.unload().await;
    }
    Ok(())
}

fn report(sensors: &[RwisSensor]) {
    for sensor in sensors {
        if !sensor.available() {
            log::info!("{}: unavailable", sensor.name());
            continue;
        }
        match (sensor.native_value(), sensor.native_unit_of_measurement()) {
            (Some(value), Some(unit)) => log::info!("{}: {} {}", sensor.name(), value, unit),
            (Some(value), None) => log::info!("{}: {}", sensor.name(), value),
            (None, _) => log::info!("{}: unknown", sensor.name()),
        }
    }
}

// ── snapshot ────────────────────────────────────────────────────────

async fn run_snapshot(path: &Path, output_dir: Option<&Path>) -> Result<()> {
    let store = EntryStore::from_file(path)
        .context("no entries yet, run `mdt-rwis setup` first")?;
    let transport = transport()?;
    let base_url = store.base_url();

    let mut sites = Vec::new();
    for entry in store.entries_for_domain(mdt_rwis::DOMAIN) {
        let client = RwisClient::new(transport.clone(), base_url.clone(), entry.data.api_key.clone());
        let coordinator = Arc::new(UpdateCoordinator::new(
            client,
            entry.data.site_id.clone(),
            entry.data.update_interval.as_duration(),
        ));
        if let Err(e) = coordinator.first_refresh().await {
            log::error!("{}: {}", entry.title, e);
            continue;
        }

        let sensors: serde_json::Map<_, _> = setup_sensors(&coordinator)
            .iter()
            .map(|s| {
                let state = json!({
                    "name": s.name(),
                    "value": s.native_value(),
                    "unit": s.native_unit_of_measurement(),
                });
                (s.unique_id().to_string(), state)
            })
            .collect();

        let mut cameras = Vec::new();
        for camera in setup_cameras(&coordinator) {
            let mut saved = None;
            if let Some(dir) = output_dir {
                if let Some(bytes) = camera.camera_image().await {
                    std::fs::create_dir_all(dir)?;
                    let file = dir.join(format!("{}.jpg", camera.unique_id()));
                    std::fs::write(&file, bytes)
                        .with_context(|| format!("failed to write {}", file.display()))?;
                    saved = Some(file.display().to_string());
                }
            }
            cameras.push(json!({
                "id": camera.unique_id(),
                "name": camera.name(),
                "attributes": camera.extra_state_attributes(),
                "image": saved,
            }));
        }

        sites.push(json!({
            "title": entry.title,
            "site_id": entry.data.site_id,
            "sensors": sensors,
            "cameras": cameras,
        }));
    }

    println!("{}", serde_json::to_string_pretty(&sites)?);
    Ok(())
}
