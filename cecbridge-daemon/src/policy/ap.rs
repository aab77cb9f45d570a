use crate::runner::Backends;
use cecbridge_core::{
    config::AppSettings,
    hotspot::HotspotManager,
    provisioner::NetworkProvisioner,
    web_server::{self, SetupState},
};
use std::sync::Arc;
use std::time::Duration;

/// AP policy: scan, raise the hotspot, serve the setup portal until told to stop.
pub async fn run(settings: &AppSettings, backends: &Backends) -> anyhow::Result<()> {
    tracing::info!("📡 CEC-Sonos Bridge - AP mode");
    let state = super::state_store(settings);

    let hotspot = Arc::new(HotspotManager::new(
        backends.profiles.clone(),
        backends.system.clone(),
        state.clone(),
        settings.network.clone(),
        settings.hotspot.clone(),
    ));
    hotspot.prescan().await;
    if !hotspot.start().await {
        anyhow::bail!("Failed to create hotspot");
    }
    tracing::info!(
        "Connect to WiFi '{}' (password '{}'), then open http://{}",
        settings.hotspot.ssid,
        settings.hotspot.psk,
        settings.hotspot.gateway_ip()
    );

    let provisioner = Arc::new(NetworkProvisioner::new(
        hotspot.clone(),
        backends.profiles.clone(),
        backends.speakers.clone(),
        state.clone(),
        settings.network.clone(),
        settings.provisioning.clone(),
    ));
    let app = web_server::setup_router(Arc::new(SetupState {
        provisioner,
        state,
        system: backends.system.clone(),
        frontend: backends.frontend.clone(),
        portal_url: format!("http://{}/", settings.hotspot.gateway_ip()),
        reboot_delay: Duration::from_secs(settings.provisioning.reboot_delay_secs),
    }));

    let served = web_server::serve(app, settings.hotspot.bind_addr, super::shutdown_signal()).await;
    hotspot.stop().await;
    served?;
    Ok(())
}
