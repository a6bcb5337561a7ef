//! EPICS `caput` writer
//!
//! Each write spawns the Channel Access command-line tool:
//!
//! ```text
//! caput -c -w <timeout> <pv> <value>
//! ```
//!
//! `-c` makes `caput` wait for the put callback, so a zero exit status means the
//! IOC accepted the value. The child is killed if the overall deadline passes.

use super::{PvValue, PvWriter};
use crate::error::WriteError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Process start-up allowance on top of the Channel Access timeout.
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Writer that shells out to `caput`.
#[derive(Debug, Clone)]
pub struct CaputWriter {
    program: String,
}

impl CaputWriter {
    /// Use the `caput` found at `program` (a path or a name on `PATH`).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, pv: &str, value: PvValue, timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg("-w")
            .arg(format!("{:.3}", timeout.as_secs_f64()))
            .arg(pv)
            .arg(value.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PvWriter for CaputWriter {
    async fn write(&self, pv: &str, value: PvValue, timeout: Duration) -> Result<(), WriteError> {
        let child = self
            .command(pv, value, timeout)
            .spawn()
            .map_err(|e| WriteError::Io(format!("failed to spawn '{}': {}", self.program, e)))?;

        let output = tokio::time::timeout(timeout + SPAWN_GRACE, child.wait_with_output())
            .await
            .map_err(|_| WriteError::Timeout(timeout))?
            .map_err(|e| WriteError::Io(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(pv, %value, stdout = %stdout.trim(), "caput finished");

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("caput exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            Err(WriteError::Rejected(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        let writer = CaputWriter::new("caput");
        let cmd = writer.command(
            "PumpA:Step-SP_Backend",
            PvValue::Int(15),
            Duration::from_secs(1),
        );
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-c", "-w", "1.000", "PumpA:Step-SP_Backend", "15"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let writer = CaputWriter::new("/nonexistent/bin/caput");
        let result = writer
            .write("PumpA:Step-SP_Backend", PvValue::Int(0), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(WriteError::Io(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_rejected() {
        // `false` ignores its arguments and exits 1
        let writer = CaputWriter::new("false");
        let result = writer
            .write("PumpA:Step-SP_Backend", PvValue::Int(0), Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(WriteError::Rejected(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let writer = CaputWriter::new("true");
        let result = writer
            .write("PumpA:Step-SP_Backend", PvValue::Int(0), Duration::from_secs(2))
            .await;
        assert!(result.is_ok());
    }
}
