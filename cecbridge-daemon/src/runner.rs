use anyhow::Context;
use cecbridge_core::{
    config::AppSettings,
    frontends::EmbedFrontend,
    structs::Mode,
    traits::{CecTransport, NetworkProfileStore, SpeakerRegistry, SystemControl, UiAssetProvider},
};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::sync::Arc;

/// Every adapter the policies need, chosen at compile time.
pub struct Backends {
    pub profiles: Arc<dyn NetworkProfileStore>,
    pub speakers: Arc<dyn SpeakerRegistry>,
    pub system: Arc<dyn SystemControl>,
    pub cec: Arc<dyn CecTransport>,
    pub frontend: Arc<dyn UiAssetProvider>,
}

#[cfg(not(feature = "backend_mock"))]
impl Backends {
    pub fn build(settings: &AppSettings) -> anyhow::Result<Self> {
        use cecbridge_core::backends::{
            cec_client::CecClientTransport, nmcli::NmcliProfileStore, sonos::SonosRegistry,
            systemd::SystemdControl,
        };
        use std::time::Duration;

        tracing::debug!("🚀 Using NetworkManager + Sonos + cec-client backends");
        Ok(Self {
            profiles: Arc::new(NmcliProfileStore::new(&settings.network)),
            speakers: Arc::new(
                SonosRegistry::new(Duration::from_secs(5)).context("Cannot build HTTP client")?,
            ),
            system: Arc::new(SystemdControl::new(&settings.bridge.service_name)),
            cec: Arc::new(CecClientTransport::new()),
            frontend: Arc::new(EmbedFrontend::new()),
        })
    }
}

#[cfg(feature = "backend_mock")]
impl Backends {
    pub fn build(_settings: &AppSettings) -> anyhow::Result<Self> {
        use cecbridge_core::backends::mock::{MockCec, MockProfileStore, MockSpeakers, MockSystem};

        tracing::info!("🤖 Using mock backends");
        Ok(Self {
            profiles: Arc::new(MockProfileStore::demo()),
            speakers: Arc::new(MockSpeakers::demo()),
            system: Arc::new(MockSystem::new()),
            cec: Arc::new(MockCec::idle_after(&[
                "TRAFFIC: [  1000]\t>> 05:44:41",
                "TRAFFIC: [  1200]\t>> 05:44:42",
                "TRAFFIC: [  1400]\t>> 05:44:43",
            ])),
            frontend: Arc::new(EmbedFrontend::new()),
        })
    }
}

/// The settings file from `--settings`, or the built-in defaults. Mock
/// builds keep all state under the temp directory instead of `/opt`.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<AppSettings> {
    if let Some(path) = path {
        return AppSettings::from_file(path)
            .with_context(|| format!("Cannot load settings from {}", path.display()));
    }
    if cfg!(feature = "backend_mock") {
        let dir = std::env::temp_dir().join("cec-sonos-bridge");
        std::fs::create_dir_all(&dir)?;
        return Ok(AppSettings::rooted_at(&dir));
    }
    Ok(AppSettings::embedded())
}

/// Replace this process with `cec-sonos-bridge [--settings FILE] <mode>`.
/// Only returns if the exec itself failed.
pub fn enter_mode(mode: Mode, settings_path: Option<&Path>) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    let mut command = std::process::Command::new(exe);
    if let Some(path) = settings_path {
        command.arg("--settings").arg(path);
    }
    command.arg(mode.as_arg());

    let err = command.exec();
    Err(anyhow::Error::new(err).context(format!("Failed to start {} mode", mode.as_arg())))
}
