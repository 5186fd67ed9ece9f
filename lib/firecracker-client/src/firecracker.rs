use crate::api::{ApiError, FirecrackerApiClient};
use crate::dto::{
    ActionType, BootSource, Drive, InstanceActionInfo, MachineConfiguration, MemoryBackend,
    MemoryBackendType, NetworkInterface, SnapshotCreateParams, SnapshotLoadParams, SnapshotType,
    Vm, VmState,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::time::{Duration, sleep, timeout};

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SOCKET_POLL_ATTEMPTS: u32 = 50;
// The API socket file shows up before the accept loop is serving.
const SOCKET_SETTLE: Duration = Duration::from_millis(200);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to spawn Firecracker process: {0}")]
    Process(#[from] std::io::Error),

    #[error("Timed out waiting for api socket: {0}")]
    SpawnTimeout(PathBuf),

    #[error("Api error: {0}")]
    Api(#[from] ApiError),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Supervisor-side view of one micro-VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Spawning,
    Ready,
    Configured,
    Running,
    Paused,
    Exited,
}

#[derive(Debug, Default, Clone)]
struct VmConfig {
    boot_source: Option<BootSource>,
    root_drive: Option<Drive>,
    machine_config: Option<MachineConfiguration>,
    network: Option<NetworkInterface>,
}

/// Firecracker wrapper, you should use [`crate::FirecrackerBuilder`] to create it.
///
/// Owns the child process, the control socket path and the serial log path
/// for exactly one instance. The guest console (child stdout and stderr) is
/// redirected into the serial log file at spawn time.
#[derive(Debug)]
pub struct Firecracker {
    firecracker_binary: PathBuf,
    args: Vec<String>,
    api_socket_path: PathBuf,
    serial_log_path: PathBuf,
    client: Option<FirecrackerApiClient>,
    process: Option<Child>,
    state: InstanceState,
    config: VmConfig,
}

impl Firecracker {
    pub(crate) fn new(
        firecracker_binary: PathBuf,
        args: Vec<String>,
        api_socket_path: PathBuf,
        serial_log_path: PathBuf,
    ) -> Self {
        Self {
            firecracker_binary,
            args,
            api_socket_path,
            serial_log_path,
            client: None,
            process: None,
            state: InstanceState::Spawning,
            config: VmConfig::default(),
        }
    }

    /// Get instance state
    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn api_socket_path(&self) -> &Path {
        &self.api_socket_path
    }

    pub fn serial_log_path(&self) -> &Path {
        &self.serial_log_path
    }

    /// Pid of the running child, if any
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    /// Get api client
    ///
    /// WARN: Before using this method, you should know what you are doing.
    pub fn api(&self) -> Result<&FirecrackerApiClient, Error> {
        self.client
            .as_ref()
            .ok_or(Error::InvalidState("Firecracker not spawned"))
    }

    /// Ensure the instance has not been configured yet
    fn ensure_unconfigured(&self) -> Result<(), Error> {
        match self.state {
            InstanceState::Spawning | InstanceState::Ready => Ok(()),
            _ => Err(Error::InvalidState(
                "Cannot modify config after the instance was configured",
            )),
        }
    }

    /// Set boot source
    pub fn set_boot_source(&mut self, boot_source: BootSource) -> Result<(), Error> {
        self.ensure_unconfigured()?;
        self.config.boot_source = Some(boot_source);
        Ok(())
    }

    /// Set the root drive
    pub fn set_root_drive(&mut self, drive: Drive) -> Result<(), Error> {
        self.ensure_unconfigured()?;
        self.config.root_drive = Some(drive);
        Ok(())
    }

    /// Set machine configuration
    pub fn set_machine_config(&mut self, machine_config: MachineConfiguration) -> Result<(), Error> {
        self.ensure_unconfigured()?;
        self.config.machine_config = Some(machine_config);
        Ok(())
    }

    /// Set the guest network interface
    pub fn set_network_interface(&mut self, network: NetworkInterface) -> Result<(), Error> {
        self.ensure_unconfigured()?;
        self.config.network = Some(network);
        Ok(())
    }

    /// Spawn the Firecracker child and wait for its control socket.
    ///
    /// Stale socket and serial log files from a previous instance are
    /// removed first. The socket file is polled for appearance; a settle
    /// delay follows before the client is handed out.
    pub async fn spawn(&mut self) -> Result<(), Error> {
        if self.process.is_some() {
            return Err(Error::InvalidState("Firecracker already spawned"));
        }

        remove_if_exists(&self.api_socket_path).await?;
        remove_if_exists(&self.serial_log_path).await?;

        let serial_log = tokio::fs::File::create(&self.serial_log_path)
            .await?
            .into_std()
            .await;
        let serial_log_err = serial_log.try_clone()?;

        let child = Command::new(&self.firecracker_binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(serial_log))
            .stderr(Stdio::from(serial_log_err))
            .spawn()?;

        let mut appeared = false;
        for _ in 0..SOCKET_POLL_ATTEMPTS {
            if tokio::fs::try_exists(&self.api_socket_path)
                .await
                .unwrap_or(false)
            {
                appeared = true;
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }

        if !appeared {
            let mut child = child;
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(Error::SpawnTimeout(self.api_socket_path.clone()));
        }

        sleep(SOCKET_SETTLE).await;

        self.client = Some(FirecrackerApiClient::new(&self.api_socket_path));
        self.process = Some(child);
        self.state = InstanceState::Ready;

        Ok(())
    }

    /// Apply the staged configuration through the api client.
    ///
    /// The control plane rejects out-of-order configuration: boot source,
    /// root drive, machine config, then the optional network interface.
    pub async fn configure(&mut self) -> Result<(), Error> {
        if self.state != InstanceState::Ready {
            return Err(Error::InvalidState("Cannot configure: vmm is not ready"));
        }

        let boot_source = self
            .config
            .boot_source
            .as_ref()
            .ok_or(Error::InvalidState("Boot source not set"))?;
        let root_drive = self
            .config
            .root_drive
            .as_ref()
            .ok_or(Error::InvalidState("Root drive not set"))?;
        let machine_config = self
            .config
            .machine_config
            .as_ref()
            .ok_or(Error::InvalidState("Machine config not set"))?;

        let client = self.api()?;
        client.put_boot_source(boot_source).await?;
        client.put_drive(root_drive).await?;
        client.put_machine_config(machine_config).await?;
        if let Some(network) = &self.config.network {
            client.put_network_interface(network).await?;
        }

        self.state = InstanceState::Configured;

        Ok(())
    }

    /// Put the `InstanceStart` action
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.state != InstanceState::Configured {
            return Err(Error::InvalidState("Cannot start: vmm is not configured"));
        }

        self.api()?
            .put_actions(&InstanceActionInfo {
                action_type: ActionType::InstanceStart,
            })
            .await?;

        self.state = InstanceState::Running;

        Ok(())
    }

    /// Pause the running instance
    pub async fn pause(&mut self) -> Result<(), Error> {
        if self.state != InstanceState::Running {
            return Err(Error::InvalidState("Cannot pause: vm is not running"));
        }

        self.api()?
            .patch_vm(&Vm {
                state: VmState::Paused,
            })
            .await?;

        self.state = InstanceState::Paused;

        Ok(())
    }

    /// Resume a paused instance
    pub async fn resume(&mut self) -> Result<(), Error> {
        if self.state != InstanceState::Paused {
            return Err(Error::InvalidState("Cannot resume: vm is not paused"));
        }

        self.api()?
            .patch_vm(&Vm {
                state: VmState::Resumed,
            })
            .await?;

        self.state = InstanceState::Running;

        Ok(())
    }

    /// Persist a full snapshot of a paused instance.
    pub async fn create_snapshot(
        &mut self,
        snapshot_path: &Path,
        mem_file_path: &Path,
    ) -> Result<(), Error> {
        if self.state != InstanceState::Paused {
            return Err(Error::InvalidState("Cannot snapshot: vm is not paused"));
        }

        self.api()?
            .put_snapshot_create(&SnapshotCreateParams {
                snapshot_type: Some(SnapshotType::Full),
                mem_file_path: mem_file_path.to_string_lossy().into_owned(),
                snapshot_path: snapshot_path.to_string_lossy().into_owned(),
            })
            .await?;

        Ok(())
    }

    /// Load a snapshot into a freshly spawned, unconfigured instance and
    /// resume it. Boot source, drives, machine config and network settings
    /// are part of the snapshot; none may be set beforehand.
    pub async fn load_snapshot(
        &mut self,
        snapshot_path: &Path,
        mem_file_path: &Path,
    ) -> Result<(), Error> {
        if self.state != InstanceState::Ready {
            return Err(Error::InvalidState(
                "Cannot load snapshot: vmm is not a fresh instance",
            ));
        }

        self.api()?
            .put_snapshot_load(&SnapshotLoadParams {
                enable_diff_snapshots: false,
                mem_backend: MemoryBackend {
                    backend_type: MemoryBackendType::File,
                    backend_path: mem_file_path.to_string_lossy().into_owned(),
                },
                snapshot_path: snapshot_path.to_string_lossy().into_owned(),
                resume_vm: true,
            })
            .await?;

        self.state = InstanceState::Running;

        Ok(())
    }

    /// Check whether the child has exited without blocking.
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>, Error> {
        let process = self
            .process
            .as_mut()
            .ok_or(Error::InvalidState("Firecracker not spawned"))?;

        let status = process.try_wait().map_err(Error::Process)?;
        if status.is_some() {
            self.state = InstanceState::Exited;
        }

        Ok(status)
    }

    /// Terminate the child: SIGTERM, a bounded grace wait, then SIGKILL
    /// and an unconditional reap. Safe to call on every exit path.
    pub async fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Some(pid) = process.id() {
                unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            }

            if timeout(SHUTDOWN_GRACE, process.wait()).await.is_err() {
                let _ = process.kill().await;
                let _ = process.wait().await;
            }
        }

        self.client = None;
        self.state = InstanceState::Exited;
    }
}

impl Drop for Firecracker {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.start_kill();
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
