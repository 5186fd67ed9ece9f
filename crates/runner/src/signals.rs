//! Host termination signals turned into one orderly cleanup sweep.
use crate::lifecycle::ResourceTracker;
use log::{error, warn};
use tokio::signal::unix::{SignalKind, signal};

/// Install SIGINT/SIGTERM handling. On the first signal the tracker is
/// swept (vmm terminated, artifacts unlinked) and the process exits with
/// `128 + signo`; signals arriving during the sweep are ignored.
pub fn install(tracker: ResourceTracker) {
    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("cannot install SIGINT handler: {e}");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                return;
            }
        };

        let signo = tokio::select! {
            _ = interrupt.recv() => libc::SIGINT,
            _ = terminate.recv() => libc::SIGTERM,
        };

        warn!("interrupted, cleaning up");
        tracker.sweep_blocking();
        std::process::exit(128 + signo);
    });
}
