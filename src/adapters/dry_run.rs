use super::{PvValue, PvWriter};
use crate::error::WriteError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Writer that only logs. Default backend so a misconfigured run touches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunWriter;

impl DryRunWriter {
    /// Create a dry-run writer
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PvWriter for DryRunWriter {
    async fn write(&self, pv: &str, value: PvValue, _timeout: Duration) -> Result<(), WriteError> {
        info!(pv, %value, "dry-run: write skipped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn test_dry_run_logs_and_succeeds() {
        let writer = DryRunWriter::new();
        let result = writer
            .write("SI-01SA:VA-SIP20-BG:Step-SP_Backend", PvValue::Int(15), Duration::from_secs(1))
            .await;
        assert!(result.is_ok());
        assert!(logs_contain("dry-run: write skipped"));
        assert!(logs_contain("SI-01SA:VA-SIP20-BG:Step-SP_Backend"));
    }
}
