pub mod capture;
pub mod input;
pub mod keyboard;
pub mod scroll;
pub mod session;
pub mod settings;
mod utils;

use anyhow::Result;
use std::path::PathBuf;

use settings::SettingsStore;

const ENABLE_LOGS: bool = true;

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "OSK_PILOT_SETTINGS";
const DEFAULT_SETTINGS_PATH: &str = "config/settings.json";

pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log_info!("osk-pilot starting up...");

    let store = SettingsStore::new(settings_path())?;
    run_desktop(store)
}

#[cfg(feature = "desktop")]
fn run_desktop(store: SettingsStore) -> Result<()> {
    use anyhow::Context;
    use capture::XcapScreen;
    use input::EnigoPointer;
    use keyboard::SystemKeyboardProcess;
    use session::AutomationSession;

    let settings = store.settings();
    let pointer = input::shared(EnigoPointer::new()?);
    let process = SystemKeyboardProcess::new(
        settings.keyboard.program.clone(),
        settings.keyboard.process_name.clone(),
    );

    let mut session = AutomationSession::new(
        settings,
        pointer,
        Box::new(process),
        Box::new(XcapScreen::new()),
        Box::new(XcapScreen::new()),
    );
    session.start(false).context("keyboard setup failed")?;

    let submissions = session.sweep(None, |capture, blocks| {
        let mut prepared = Vec::with_capacity(blocks.len());
        for block in &blocks {
            prepared.push(capture.prepare_for_model(block)?);
        }
        Ok(Some(prepared))
    });
    let saved: usize = submissions.iter().map(Vec::len).sum();

    let removed = session
        .capture()
        .cleanup_old_captures(settings.capture.retention_days)?;
    let position = session.scroll().position().clone();
    log_info!(
        "run complete: {saved} blocks saved over {} scrolls (at bottom: {}), {removed} old captures removed",
        position.scroll_count,
        position.at_bottom
    );
    Ok(())
}

#[cfg(not(feature = "desktop"))]
fn run_desktop(store: SettingsStore) -> Result<()> {
    log_error!(
        "built without the `desktop` feature; no pointer or screen backend (settings: {})",
        store.path().display()
    );
    anyhow::bail!("no desktop backend available")
}
