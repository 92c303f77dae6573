//! Temporary server instance started in forced crash-recovery mode.
//!
//! Used when the regular server is not reachable. InnoDB's forced recovery
//! makes tables readable that failed a clean shutdown, possibly losing the
//! most recent writes.

use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{InstallLayout, ServerTarget};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Tuning of the recovery server start and shutdown.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// How long to wait for the server to accept connections.
    pub wait_secs: u64,
    /// Pause between two connection attempts.
    pub poll_interval_ms: u64,
    /// Time granted to a terminated server before it is killed.
    pub grace_secs: u64,
    /// Name of the generated server config, created in the binary directory.
    pub config_name: String,
    /// Value of `innodb_force_recovery`.
    pub force_recovery: u8,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            wait_secs: 25,
            poll_interval_ms: 1000,
            grace_secs: 5,
            config_name: "tmp_recovery.ini".into(),
            force_recovery: 6,
        }
    }
}

impl RecoverySettings {
    fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Outcome of [start].
///
/// Even when not `started` the spawned server and the written config are
/// handed out, dropping them stops the process and removes the file.
#[derive(Debug)]
pub struct RecoveryAttempt {
    /// The server accepted a TCP connection within the wait window.
    pub started: bool,
    pub server: Option<RecoveryServer>,
    pub config: Option<RecoveryConfigFile>,
}

/// The generated server configuration. Removed on drop.
#[derive(Debug)]
pub struct RecoveryConfigFile {
    path: PathBuf,
}

impl RecoveryConfigFile {
    fn write(path: PathBuf, contents: &str) -> io::Result<Self> {
        fs::write(&path, contents)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RecoveryConfigFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!(target: "mariadb::recovery", "Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "mariadb::recovery",
                "Removing recovery config {} failed: {e}",
                self.path.display()
            ),
        }
    }
}

/// A running recovery server. Stopped on drop.
#[derive(Debug)]
pub struct RecoveryServer {
    child: Child,
    grace: Duration,
    stopped: bool,
}

impl RecoveryServer {
    /// Process id of the server.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Terminates the server, killing it if it outlives the grace period.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let pid = self.id();
        if let Ok(Some(status)) = self.child.try_wait() {
            log::debug!(
                target: "mariadb::recovery",
                "Recovery server {pid} already exited: {status}"
            );
            return;
        }

        log::info!(target: "mariadb::recovery", "Stopping recovery server {pid}");
        if terminate(pid) {
            let deadline = Instant::now() + self.grace;
            while Instant::now() < deadline {
                match self.child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(STOP_POLL),
                    Err(_) => break,
                }
            }
        }

        log::warn!(target: "mariadb::recovery", "Killing recovery server {pid}");
        if let Err(e) = self.child.kill() {
            log::warn!(target: "mariadb::recovery", "Killing recovery server {pid} failed: {e}");
        }
        let _ = self.child.wait();
    }
}

impl Drop for RecoveryServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}

/// Server configuration forcing InnoDB crash recovery on the real data.
pub fn render_config(layout: &InstallLayout, port: u16, force_recovery: u8) -> String {
    let slashed = |path: PathBuf| path.display().to_string().replace('\\', "/");

    format!(
        "[mysqld]\n\
         basedir={basedir}\n\
         datadir={datadir}\n\
         port={port}\n\
         socket={socket}\n\
         innodb_force_recovery={force_recovery}\n\
         innodb_purge_threads=0\n\
         innodb_doublewrite=0\n\
         innodb_log_checksums=ON\n\
         innodb_checksum_algorithm=crc32\n",
        basedir = slashed(layout.server_base()),
        datadir = slashed(layout.data_dir()),
        socket = slashed(layout.socket()),
    )
}

/// Starts `server` in forced recovery mode against the layout's data
/// directory and waits for it to accept connections on the target's port.
pub fn start(
    server: &Path,
    layout: &InstallLayout,
    target: &ServerTarget,
    settings: &RecoverySettings,
) -> RecoveryAttempt {
    let config_path = layout.bin_dir().join(&settings.config_name);
    let contents = render_config(layout, target.port, settings.force_recovery);
    let config = match RecoveryConfigFile::write(config_path, &contents) {
        Ok(config) => config,
        Err(e) => {
            log::error!(target: "mariadb::recovery", "Writing recovery config failed: {e}");
            return RecoveryAttempt {
                started: false,
                server: None,
                config: None,
            };
        }
    };
    log::debug!(target: "mariadb::recovery", "Wrote recovery config {}", config.path().display());

    let spawned = Command::new(server)
        .arg(format!("--defaults-file={}", config.path().display()))
        .arg("--standalone")
        .arg("--console")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            log::error!(target: "mariadb::recovery", "Launching {} failed: {e}", server.display());
            return RecoveryAttempt {
                started: false,
                server: None,
                config: Some(config),
            };
        }
    };
    log::info!(target: "mariadb::recovery", "Spawned recovery server {}", child.id());

    let server = RecoveryServer {
        child,
        grace: settings.grace(),
        stopped: false,
    };
    let started = wait_for_tcp(
        &target.host,
        target.port,
        settings.wait(),
        settings.poll_interval(),
    );
    if started {
        log::info!(target: "mariadb::recovery", "Recovery server accepts connections");
    } else {
        log::warn!(
            target: "mariadb::recovery",
            "Recovery server did not accept connections within {}s",
            settings.wait_secs
        );
    }

    RecoveryAttempt {
        started,
        server: Some(server),
        config: Some(config),
    }
}

/// Polls until `host:port` accepts a TCP connection or `window` elapsed.
pub fn wait_for_tcp(host: &str, port: u16, window: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }

        let connected = (host, port)
            .to_socket_addrs()
            .map(|mut addrs| {
                addrs.any(|addr| {
                    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT.min(remaining)).is_ok()
                })
            })
            .unwrap_or(false);
        if connected {
            return true;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(interval.min(remaining));
    }
}
