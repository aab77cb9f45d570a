use crate::runner::{self, Backends};
use cecbridge_core::{
    config::AppSettings,
    mode::{BootFlags, ModeSelector},
    structs::Mode,
};
use std::path::Path;

/// Startup policy: pick the mode for this boot and become it.
pub async fn run(settings: &AppSettings, backends: &Backends, settings_path: Option<&Path>) -> anyhow::Result<()> {
    tracing::info!("🚀 CEC-Sonos Bridge startup");

    let config = super::state_store(settings).load_config().await;
    let flags = BootFlags::detect(&settings.paths);
    let selector = ModeSelector::new(
        backends.profiles.clone(),
        settings.network.clone(),
        settings.boot.clone(),
    );
    let mode = selector.select(flags, &config).await?;

    match mode {
        Mode::Ap => tracing::info!(
            "STARTING AP MODE: join '{}' and open http://{}",
            settings.hotspot.ssid,
            settings.hotspot.gateway_ip()
        ),
        Mode::Bridge => tracing::info!("STARTING BRIDGE MODE: TV remote now controls Sonos"),
    }
    runner::enter_mode(mode, settings_path)
}
