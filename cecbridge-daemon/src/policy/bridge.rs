use crate::runner::Backends;
use cecbridge_core::{
    backends::cec_client::osd_name,
    cec::CecEventBridge,
    config::AppSettings,
    watchdog::ConnectivityWatchdog,
    web_server::{self, AdminState},
    Error,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type AdminServer = JoinHandle<cecbridge_core::Result<()>>;

/// Bridge policy: run the bridge, and whenever it stops or fails, wait and
/// run it again. Only a missing configuration ends the process.
pub async fn run(settings: &AppSettings, backends: &Backends) -> anyhow::Result<()> {
    let backoff = Duration::from_secs(settings.bridge.restart_backoff_secs);
    let mut admin: Option<AdminServer> = None;

    loop {
        match run_once(settings, backends, &mut admin).await {
            Ok(()) => tracing::warn!("Bridge stopped"),
            Err(Error::NotConfigured) => anyhow::bail!("No configuration found"),
            Err(e) => tracing::error!("Bridge error: {}", e.detail()),
        }
        tracing::info!("Restarting in {} seconds...", backoff.as_secs());
        tokio::time::sleep(backoff).await;
    }
}

async fn run_once(
    settings: &AppSettings,
    backends: &Backends,
    admin: &mut Option<AdminServer>,
) -> cecbridge_core::Result<()> {
    tracing::info!("🔌 CEC-Sonos Bridge starting...");
    let state = super::state_store(settings);
    let config = state.load_config().await;
    let address = config.speaker().ok_or(Error::NotConfigured)?.to_string();
    let name = config.speaker_name.clone().unwrap_or_else(|| "Sonos".to_string());

    let mut watchdog = ConnectivityWatchdog::new(backends.profiles.clone(), backends.system.clone(), &settings.bridge);
    let link_up = watchdog
        .wait_for_link(
            settings.bridge.startup_wifi_attempts,
            Duration::from_secs(settings.bridge.startup_wifi_interval_secs),
        )
        .await;
    if !link_up {
        tracing::error!("WiFi connection failed, rebooting...");
        return backends.system.reboot().await;
    }

    if admin.as_ref().is_none_or(|server| server.is_finished()) {
        let app = web_server::admin_router(Arc::new(AdminState {
            speakers: backends.speakers.clone(),
            state,
            system: backends.system.clone(),
            frontend: backends.frontend.clone(),
            discovery_timeout: Duration::from_secs(settings.provisioning.discovery_timeout_secs),
        }));
        *admin = Some(web_server::start_web_server(app, settings.bridge.admin_bind_addr));
    }

    tracing::info!("CEC-Sonos Bridge active. Speaker: {} ({})", name, address);
    let mut source = backends.cec.open(&osd_name(&name)).await?;
    tracing::info!("CEC client started");

    let bridge = CecEventBridge::new(backends.speakers.clone(), &address, settings.bridge.volume_step);
    bridge.run(source.as_mut(), &mut watchdog).await
}
