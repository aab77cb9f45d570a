use crate::config::BridgeSettings;
use crate::traits::{NetworkProfileStore, SystemControl};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Reboots the device once the radio has been down for too many
/// consecutive checks. There is no softer recovery: an unattended box that
/// lost its only network path cannot be reached any other way.
pub struct ConnectivityWatchdog {
    profiles: Arc<dyn NetworkProfileStore>,
    system: Arc<dyn SystemControl>,
    interval: Duration,
    check_timeout: Duration,
    threshold: u32,
    failures: u32,
    reboot_issued: bool,
}

impl ConnectivityWatchdog {
    pub fn new(
        profiles: Arc<dyn NetworkProfileStore>,
        system: Arc<dyn SystemControl>,
        settings: &BridgeSettings,
    ) -> Self {
        Self {
            profiles,
            system,
            interval: Duration::from_secs(settings.watchdog_interval_secs),
            check_timeout: Duration::from_secs(settings.watchdog_check_timeout_secs),
            threshold: settings.watchdog_threshold.max(1),
            failures: 0,
            reboot_issued: false,
        }
    }

    /// How often the bridge loop should call [`tick`](Self::tick).
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// One bounded liveness probe. Errors and timeouts count as "down".
    pub async fn check(&self) -> bool {
        match timeout(self.check_timeout, self.profiles.is_radio_connected()).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                tracing::debug!("Connectivity check failed: {}", e.detail());
                false
            }
            Err(_) => {
                tracing::debug!("Connectivity check timed out");
                false
            }
        }
    }

    /// Feed one check result. Returns true when the threshold is reached.
    pub fn record(&mut self, connected: bool) -> bool {
        if connected {
            if self.failures > 0 {
                tracing::info!("WiFi back after {} failed check(s)", self.failures);
            }
            self.failures = 0;
            return false;
        }
        self.failures += 1;
        tracing::warn!("⚠️ WiFi disconnected (count: {})", self.failures);
        self.failures >= self.threshold
    }

    /// Check, record, and reboot when due. The reboot is issued at most once.
    pub async fn tick(&mut self) {
        let connected = self.check().await;
        if !self.record(connected) || self.reboot_issued {
            return;
        }
        tracing::error!("❌ WiFi lost for too long, rebooting to AP mode");
        match self.system.reboot().await {
            Ok(()) => self.reboot_issued = true,
            Err(e) => tracing::error!("Reboot failed: {}", e.detail()),
        }
    }

    /// Poll until the radio reports a connection. Used once before the
    /// bridge starts; `false` after `attempts` polls.
    pub async fn wait_for_link(&self, attempts: u32, every: Duration) -> bool {
        if self.check().await {
            return true;
        }
        tracing::warn!("WiFi not connected, waiting...");
        for _ in 0..attempts {
            sleep(every).await;
            if self.check().await {
                tracing::info!("WiFi connected");
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockProfileStore, MockSystem};
    use crate::config::AppSettings;
    use crate::structs::ProfileSpec;

    async fn online_store() -> Arc<MockProfileStore> {
        let store = Arc::new(MockProfileStore::new().with_profile(ProfileSpec::station("Home", "Home", "pw", true)));
        store.profile_up("Home").await.unwrap();
        store
    }

    fn watchdog(store: Arc<MockProfileStore>, system: Arc<MockSystem>) -> ConnectivityWatchdog {
        ConnectivityWatchdog::new(store, system, &AppSettings::embedded().bridge)
    }

    #[tokio::test]
    async fn three_failures_reboot_exactly_once() {
        let store = online_store().await;
        let system = Arc::new(MockSystem::new());
        let mut dog = watchdog(store.clone(), system.clone());

        store.set_link_down(true).await;
        dog.tick().await;
        dog.tick().await;
        assert_eq!(system.reboots(), 0);
        dog.tick().await;
        assert_eq!(system.reboots(), 1);
        dog.tick().await;
        dog.tick().await;
        assert_eq!(system.reboots(), 1);
        assert_eq!(dog.failures(), 5);
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let store = online_store().await;
        let system = Arc::new(MockSystem::new());
        let mut dog = watchdog(store.clone(), system.clone());

        store.set_link_down(true).await;
        dog.tick().await;
        dog.tick().await;
        store.set_link_down(false).await;
        dog.tick().await;
        assert_eq!(dog.failures(), 0);
        store.set_link_down(true).await;
        dog.tick().await;
        dog.tick().await;
        assert_eq!(system.reboots(), 0);
    }

    #[test]
    fn record_reports_threshold() {
        let mut dog = watchdog(Arc::new(MockProfileStore::new()), Arc::new(MockSystem::new()));
        assert!(!dog.record(false));
        assert!(!dog.record(false));
        assert!(dog.record(false));
        assert!(!dog.record(true));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_link_gives_up() {
        let dog = watchdog(Arc::new(MockProfileStore::new()), Arc::new(MockSystem::new()));
        assert!(!dog.wait_for_link(30, Duration::from_secs(2)).await);

        let dog = watchdog(online_store().await, Arc::new(MockSystem::new()));
        assert!(dog.wait_for_link(30, Duration::from_secs(2)).await);
    }
}
