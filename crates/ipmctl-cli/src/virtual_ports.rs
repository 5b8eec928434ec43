//! Virtual serial link for running the emulator without hardware
//!
//! Spawns `socat` to create a pty pair inside a temporary directory. The
//! emulator opens the instrument port; the controller opens the user port.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info};

/// How long socat gets to create both links
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running pty pair. Dropping it stops socat and removes the directory.
pub struct VirtualPorts {
    socat: Child,
    dir: TempDir,
    instrument: PathBuf,
    user: PathBuf,
}

impl VirtualPorts {
    /// Start socat and wait until both port links exist
    pub fn start() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("ipm-ports-")
            .tempdir()
            .context("creating directory for virtual ports")?;
        let instrument = dir.path().join("instport");
        let user = dir.path().join("userport");

        let mut socat = Command::new("socat")
            .arg(pty_address(&instrument))
            .arg(pty_address(&user))
            .stdin(Stdio::null())
            .spawn()
            .context("starting socat (is it installed?)")?;

        let started = Instant::now();
        while !(instrument.exists() && user.exists()) {
            if let Some(status) = socat.try_wait()? {
                bail!("socat exited early with {}", status);
            }
            if started.elapsed() > STARTUP_TIMEOUT {
                let _ = socat.kill();
                let _ = socat.wait();
                bail!(
                    "virtual ports still missing after {}s",
                    STARTUP_TIMEOUT.as_secs()
                );
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        info!("Virtual ports ready in {}", dir.path().display());
        Ok(Self {
            socat,
            dir,
            instrument,
            user,
        })
    }

    /// Port the emulator serves on
    pub fn instrument_port(&self) -> &Path {
        &self.instrument
    }

    /// Port a controller connects to
    pub fn user_port(&self) -> &Path {
        &self.user
    }
}

fn pty_address(link: &Path) -> String {
    format!("PTY,echo=0,raw,link={}", link.display())
}

impl Drop for VirtualPorts {
    fn drop(&mut self) {
        debug!("Stopping socat");
        let _ = self.socat.kill();
        let _ = self.socat.wait();
        debug!("Removing {}", self.dir.path().display());
    }
}
