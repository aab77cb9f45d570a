use crate::traits::SystemControl;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Host control through `systemctl` and `reboot`.
#[derive(Debug, Clone)]
pub struct SystemdControl {
    service_name: String,
}

impl SystemdControl {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr);
        return Err(Error::CommandFailed(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            err.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl SystemControl for SystemdControl {
    async fn reboot(&self) -> Result<()> {
        tracing::warn!("🔁 Rebooting device");
        run("reboot", &[]).await.map(|_| ())
    }

    async fn restart_service(&self) -> Result<()> {
        // Spawned, not awaited: the restart kills this very process.
        Command::new("systemctl")
            .args(["restart", self.service_name.as_str()])
            .spawn()?;
        Ok(())
    }

    async fn service_status(&self) -> String {
        // `is-active` exits non-zero for inactive units but still prints the state.
        match Command::new("systemctl")
            .args(["is-active", self.service_name.as_str()])
            .output()
            .await
        {
            Ok(out) => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            Err(_) => "unknown".to_string(),
        }
    }

    async fn restart_mdns(&self) -> Result<()> {
        run("systemctl", &["restart", "avahi-daemon"]).await.map(|_| ())
    }
}
