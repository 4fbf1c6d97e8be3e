use crate::project::describe;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::Duration,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_EMON: &str = "emon";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to create the telemetry dump file")]
    DumpFile(#[source] std::io::Error),
    #[error("Failed to start `{command}`")]
    Start {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Telemetry collector is not running")]
    NotRunning,
    #[error("Failed to stop the telemetry collector")]
    Stop(#[source] std::io::Error),
    #[error("Telemetry collector did not exit within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("Failed to read the telemetry dump")]
    Read(#[source] std::io::Error),
}

/// Wrapper over the emon collector. The collector's output is written to a temporary dump file
/// which lives as long as this value.
#[derive(Debug)]
pub struct Emon {
    exec: PathBuf,
    timeout: Duration,
    dump: NamedTempFile,
    child: Option<Child>,
}

impl Emon {
    pub fn new(exec: impl Into<PathBuf>, timeout: Duration) -> Result<Self, TelemetryError> {
        Ok(Self {
            exec: exec.into(),
            timeout,
            dump: tempfile::Builder::new()
                .prefix("emon-")
                .suffix(".dat")
                .tempfile()
                .map_err(TelemetryError::DumpFile)?,
            child: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn start(&mut self) -> Result<(), TelemetryError> {
        let output = File::create(self.dump.path()).map_err(TelemetryError::DumpFile)?;
        let mut command = Command::new(&self.exec);
        command
            .arg("-collect-edp")
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(Stdio::null());

        let child = command.spawn().map_err(|source| TelemetryError::Start {
            command: describe(&command),
            source,
        })?;

        info!(pid = child.id(), dump = ?self.dump.path(), "Started telemetry collection");
        self.child = Some(child);

        Ok(())
    }

    /// Ask the collector to stop and wait for it to flush its data. The collector is killed if
    /// stopping fails in any way.
    pub fn stop(&mut self) -> Result<(), TelemetryError> {
        let child = self.child.as_mut().ok_or(TelemetryError::NotRunning)?;
        let result = shutdown(&self.exec, child, self.timeout);

        if let Some(mut child) = self.child.take() {
            if result.is_err() {
                terminate(&mut child);
            }
        }

        result
    }

    pub fn data(&self) -> Result<String, TelemetryError> {
        fs::read_to_string(self.dump.path()).map_err(TelemetryError::Read)
    }
}

fn shutdown(exec: &Path, child: &mut Child, timeout: Duration) -> Result<(), TelemetryError> {
    let status = Command::new(exec)
        .arg("-stop")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(TelemetryError::Stop)?;
    debug!(status = ?status, "Requested telemetry shutdown");

    match child.wait_timeout(timeout).map_err(TelemetryError::Stop)? {
        Some(status) => {
            info!(status = ?status, "Telemetry collection finished");

            Ok(())
        }
        None => {
            warn!(timeout = ?timeout, "Telemetry collector ignored the stop request, killing it");
            child.kill().map_err(TelemetryError::Stop)?;
            child.wait().map_err(TelemetryError::Stop)?;

            Err(TelemetryError::ShutdownTimeout(timeout))
        }
    }
}

fn terminate(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(error = ?error, "Failed to kill the telemetry collector");
    }
    let _ = child.wait();
}

impl Drop for Emon {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("Telemetry collector still running on drop, killing it");
            terminate(&mut child);
        }
    }
}
