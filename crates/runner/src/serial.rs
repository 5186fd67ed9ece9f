//! Tailing the serial log: whole-file reads, bounded polling.
use std::path::Path;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
/// Consecutive unchanged samples after which the log counts as stable
/// (50 samples = 5 s of silence).
pub const DEFAULT_STABILITY_WINDOW: u32 = 50;

/// What counts as "the guest is ready" when waiting for a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyPolicy {
    /// Only the marker counts; expiry reports not-ready.
    StrictMarker,
    /// The marker, or a log that stopped growing.
    MarkerOrStable,
    /// Marker, stability, or plain expiry: always proceed. Right for
    /// first-boot guests whose warmup can exceed any expected window.
    BestEffort,
}

/// Read the whole serial log as text. A log that does not exist yet reads
/// as empty.
pub async fn read_log(path: &Path) -> std::io::Result<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Poll the serial log until the guest looks ready.
///
/// Samples every 100 ms. Returns `true` as soon as `marker` appears;
/// under the stability policies, also once the log has gone
/// `stability_window` consecutive samples without growing. At the hard
/// `timeout` the policy decides the verdict.
pub async fn wait_for_ready(
    log_path: &Path,
    marker: &str,
    timeout: Duration,
    stability_window: u32,
    policy: ReadyPolicy,
) -> std::io::Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut last_len = 0usize;
    let mut stable_samples = 0u32;

    while Instant::now() < deadline {
        match tokio::fs::read(log_path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                if content.contains(marker) {
                    return Ok(true);
                }

                if policy != ReadyPolicy::StrictMarker {
                    if content.len() == last_len {
                        stable_samples += 1;
                        if stable_samples >= stability_window {
                            return Ok(true);
                        }
                    } else {
                        stable_samples = 0;
                        last_len = content.len();
                    }
                }
            }
            // Not created yet; does not count toward stability.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        sleep(SAMPLE_INTERVAL).await;
    }

    Ok(policy == ReadyPolicy::BestEffort)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marker_is_seen_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("serial.log");
        tokio::fs::write(&log, "booting...\nSNAPSHOT_READY\n")
            .await
            .unwrap();

        let ready = wait_for_ready(
            &log,
            "SNAPSHOT_READY",
            Duration::from_secs(5),
            DEFAULT_STABILITY_WINDOW,
            ReadyPolicy::StrictMarker,
        )
        .await
        .unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn stable_log_counts_as_ready() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("serial.log");
        tokio::fs::write(&log, "runtime loaded, no marker\n")
            .await
            .unwrap();

        let ready = wait_for_ready(
            &log,
            "SNAPSHOT_READY",
            Duration::from_secs(5),
            3,
            ReadyPolicy::MarkerOrStable,
        )
        .await
        .unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn strict_policy_reports_not_ready_on_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("serial.log");
        tokio::fs::write(&log, "still warming up\n").await.unwrap();

        let ready = wait_for_ready(
            &log,
            "SNAPSHOT_READY",
            Duration::from_millis(300),
            DEFAULT_STABILITY_WINDOW,
            ReadyPolicy::StrictMarker,
        )
        .await
        .unwrap();
        assert!(!ready);
    }

    #[tokio::test]
    async fn best_effort_proceeds_on_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("never-written.log");

        let ready = wait_for_ready(
            &log,
            "SNAPSHOT_READY",
            Duration::from_millis(300),
            DEFAULT_STABILITY_WINDOW,
            ReadyPolicy::BestEffort,
        )
        .await
        .unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_log(&dir.path().join("absent.log")).await.unwrap(), "");
    }
}
