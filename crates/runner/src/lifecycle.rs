//! The invocation state machine: stage, provision, spawn, configure,
//! start, wait, decode, and unconditionally clean up.
use crate::config::{BOOT_ARGS, Config, ValidationError, ensure_root};
use crate::network::{self, NetworkError};
use crate::serial;
use crate::stage::{self, StageError};
use firecracker_client::dto::{BootSource, Drive, MachineConfiguration, NetworkInterface};
use firecracker_client::{Firecracker, FirecrackerBuilder};
use log::{info, warn};
use protocol::result::{self, Output};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, sleep};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One function invocation, immutable once built.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub function_path: PathBuf,
    pub input: Vec<u8>,
    pub networking: bool,
    pub timeout: Duration,
}

/// Guest budget, measured from `InstanceStart`. Networked functions get
/// longer: DNS plus TLS against a cold cache is slow.
pub fn default_timeout(networking: bool) -> Duration {
    Duration::from_secs(if networking { 60 } else { 30 })
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Staging error: {0}")]
    Stage(#[from] StageError),

    #[error("Network setup error: {0}")]
    Network(#[from] NetworkError),

    #[error("Vmm error: {0}")]
    Vmm(#[from] firecracker_client::Error),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
struct Resources {
    vmm_pid: Option<u32>,
    staged_disk: Option<PathBuf>,
    api_socket: Option<PathBuf>,
    serial_log: Option<PathBuf>,
}

/// Everything an invocation has acquired so far, shared with the signal
/// handler. Resources are registered the moment they exist and taken out
/// as they are released, so a sweep at any point removes exactly what is
/// left.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Mutex<Resources>>,
    sweeping: Arc<AtomicBool>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Resources> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track_staged_disk(&self, path: PathBuf) {
        self.lock().staged_disk = Some(path);
    }

    pub fn track_api_socket(&self, path: PathBuf) {
        self.lock().api_socket = Some(path);
    }

    pub fn track_serial_log(&self, path: PathBuf) {
        self.lock().serial_log = Some(path);
    }

    pub fn track_vmm(&self, pid: Option<u32>) {
        self.lock().vmm_pid = pid;
    }

    pub fn clear_vmm(&self) {
        self.lock().vmm_pid = None;
    }

    /// Remaining file artifacts in release order: staged disk, api socket,
    /// serial log.
    pub fn take_paths(&self) -> Vec<PathBuf> {
        let mut resources = self.lock();
        [
            resources.staged_disk.take(),
            resources.api_socket.take(),
            resources.serial_log.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Synchronous sweep for signal context: terminate the vmm with
    /// escalation, then unlink leftover files. Runs at most once; later
    /// calls (a second signal mid-sweep) are ignored.
    pub fn sweep_blocking(&self) {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            return;
        }

        let pid = self.lock().vmm_pid.take();
        if let Some(pid) = pid {
            terminate_pid(pid);
        }

        for path in self.take_paths() {
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// SIGTERM, poll for the process to disappear, then SIGKILL.
fn terminate_pid(pid: u32) {
    let pid = pid as libc::pid_t;
    unsafe { libc::kill(pid, libc::SIGTERM) };

    for _ in 0..50 {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    unsafe { libc::kill(pid, libc::SIGKILL) };
}

/// Run one invocation end to end. Cleanup is unconditional: the vmm
/// child, the staged disk, the control socket and the serial log are all
/// gone when this returns, on success and on every failure path. The TAP
/// device is kept.
pub async fn invoke(
    config: &Config,
    request: &InvocationRequest,
    tracker: &ResourceTracker,
) -> Result<Output, Error> {
    validate(config, request)?;

    if request.networking {
        network::ensure_network(&config.network).await?;
    }

    let mut vmm = None;
    let result = run_invocation(config, request, tracker, &mut vmm).await;
    release(tracker, &mut vmm).await;
    result
}

fn validate(config: &Config, request: &InvocationRequest) -> Result<(), Error> {
    ensure_root()?;
    config.validate()?;

    if !request.function_path.exists() {
        return Err(ValidationError(format!(
            "function not found: {}",
            request.function_path.display()
        ))
        .into());
    }

    Ok(())
}

async fn run_invocation(
    config: &Config,
    request: &InvocationRequest,
    tracker: &ResourceTracker,
    vmm: &mut Option<Firecracker>,
) -> Result<Output, Error> {
    let staged = stage::stage(
        &config.rootfs_template,
        &request.function_path,
        &request.input,
    )
    .await?;
    tracker.track_staged_disk(staged.path().to_path_buf());

    tracker.track_api_socket(config.api_socket_path.clone());
    tracker.track_serial_log(config.serial_log_path.clone());

    let mut builder = FirecrackerBuilder::new(&config.firecracker_bin);
    builder
        .with_api_socket_path(config.api_socket_path.clone())
        .with_serial_log_path(config.serial_log_path.clone());
    let fc = vmm.insert(builder.build()?);

    info!("spawning firecracker");
    fc.spawn().await?;
    tracker.track_vmm(fc.pid());

    fc.set_boot_source(BootSource {
        boot_args: Some(BOOT_ARGS.to_string()),
        initrd_path: None,
        kernel_image_path: config.kernel_path.to_string_lossy().into_owned(),
    })?;
    fc.set_root_drive(Drive {
        drive_id: "rootfs".to_string(),
        path_on_host: staged.path().to_string_lossy().into_owned(),
        is_root_device: true,
        is_read_only: false,
    })?;
    fc.set_machine_config(MachineConfiguration {
        vcpu_count: config.vcpu_count,
        mem_size_mib: config.mem_size_mib,
    })?;
    if request.networking {
        fc.set_network_interface(NetworkInterface {
            guest_mac: Some(config.network.guest_mac.clone()),
            host_dev_name: config.network.tap_name.clone(),
            iface_id: "eth0".to_string(),
        })?;
    }

    info!(
        "configuring microvm ({} vCPU, {} MiB)",
        config.vcpu_count, config.mem_size_mib
    );
    fc.configure().await?;

    info!("starting microvm");
    fc.start().await?;

    // The guest runs the function and powers itself off; wait for the vmm
    // to exit, bounded by the invocation budget.
    info!("waiting for guest (timeout {}s)", request.timeout.as_secs());
    let deadline = Instant::now() + request.timeout;
    let mut exited = false;
    while Instant::now() < deadline {
        if fc.try_wait()?.is_some() {
            exited = true;
            break;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }

    let raw = serial::read_log(&config.serial_log_path).await?;

    if !exited {
        warn!(
            "guest still running after {}s, terminating",
            request.timeout.as_secs()
        );
        fc.shutdown().await;
        return Ok(Output::Failure(raw));
    }

    Ok(result::decode(&raw))
}

/// Release everything the invocation acquired, in order: vmm child first
/// (an orphaned vmm keeps the disk file open), then staged disk, control
/// socket, serial log. Each removal checks existence, so a partial earlier
/// cleanup is harmless.
async fn release(tracker: &ResourceTracker, vmm: &mut Option<Firecracker>) {
    if let Some(mut fc) = vmm.take() {
        fc.shutdown().await;
    }
    tracker.clear_vmm();

    for path in tracker.take_paths() {
        if let Err(e) = remove_if_exists(&path).await {
            warn!("failed to remove {}: {e}", path.display());
        }
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_per_mode() {
        assert_eq!(default_timeout(false), Duration::from_secs(30));
        assert_eq!(default_timeout(true), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn release_removes_tracked_files_in_any_state() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("disk.ext4");
        let log = dir.path().join("serial.log");
        tokio::fs::write(&disk, b"x").await.unwrap();
        tokio::fs::write(&log, b"y").await.unwrap();

        let tracker = ResourceTracker::new();
        tracker.track_staged_disk(disk.clone());
        // Socket tracked but never created: removal must not error.
        tracker.track_api_socket(dir.path().join("never-created.socket"));
        tracker.track_serial_log(log.clone());

        release(&tracker, &mut None).await;

        assert!(!disk.exists());
        assert!(!log.exists());
        assert!(tracker.take_paths().is_empty());
    }

    #[test]
    fn sweep_runs_only_once() {
        let tracker = ResourceTracker::new();
        let disk = std::env::temp_dir().join("nano-lambda-sweep-test.ext4");
        std::fs::write(&disk, b"x").unwrap();
        tracker.track_staged_disk(disk.clone());

        tracker.sweep_blocking();
        assert!(!disk.exists());

        // A second sweep (second signal) is a no-op even with fresh state.
        std::fs::write(&disk, b"x").unwrap();
        tracker.track_staged_disk(disk.clone());
        tracker.sweep_blocking();
        assert!(disk.exists());

        std::fs::remove_file(&disk).unwrap();
    }
}
