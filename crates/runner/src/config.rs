//! Runner configuration, resolved once at startup and passed down
//! explicitly.
use crate::network::HostNetworkSpec;
use std::env;
use std::path::PathBuf;

/// Kernel command line for regular invocations.
pub const BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off quiet";
/// Kernel command line for the snapshot pre-warm boot; `init=/init.sh`
/// hands control to the pre-warm script baked into the template.
pub const SNAPSHOT_BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off init=/init.sh";

const DEFAULT_FIRECRACKER_BIN: &str = "./firecracker";
const DEFAULT_KERNEL: &str = "./vmlinux.bin";
const DEFAULT_API_SOCKET: &str = "/tmp/firecracker-nanolambda.socket";
const DEFAULT_SERIAL_LOG: &str = "/tmp/firecracker-output.log";
const DEFAULT_SNAPSHOT_DIR: &str = "/tmp/fc-snapshot";
const DEFAULT_VCPU_COUNT: isize = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub firecracker_bin: PathBuf,
    pub kernel_path: PathBuf,
    pub rootfs_template: PathBuf,
    pub api_socket_path: PathBuf,
    pub serial_log_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub vcpu_count: isize,
    pub mem_size_mib: isize,
    pub network: HostNetworkSpec,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl Config {
    /// Resolve the configuration from the environment. The rootfs template
    /// and memory size defaults differ per invocation mode, so the callers
    /// supply them.
    pub fn from_env(default_rootfs: &str, default_mem_size_mib: isize) -> Self {
        Self {
            firecracker_bin: env_path("NANO_FIRECRACKER_BIN", DEFAULT_FIRECRACKER_BIN),
            kernel_path: env_path("NANO_KERNEL", DEFAULT_KERNEL),
            rootfs_template: env_path("NANO_ROOTFS", default_rootfs),
            api_socket_path: env_path("NANO_API_SOCKET", DEFAULT_API_SOCKET),
            serial_log_path: env_path("NANO_SERIAL_LOG", DEFAULT_SERIAL_LOG),
            snapshot_dir: env_path("NANO_SNAPSHOT_DIR", DEFAULT_SNAPSHOT_DIR),
            vcpu_count: env_isize("NANO_VCPUS", DEFAULT_VCPU_COUNT),
            mem_size_mib: env_isize("NANO_MEM_MIB", default_mem_size_mib),
            network: HostNetworkSpec::default(),
        }
    }

    /// Check that everything an invocation spawns or mounts is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (path, what) in [
            (&self.firecracker_bin, "Firecracker binary"),
            (&self.kernel_path, "Kernel image"),
            (&self.rootfs_template, "Rootfs template"),
        ] {
            if !path.exists() {
                return Err(ValidationError(format!(
                    "{what} not found: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

/// Mounting, tap devices and firewall rules all need root.
pub fn ensure_root() -> Result<(), ValidationError> {
    if unsafe { libc::geteuid() } != 0 {
        return Err(ValidationError(
            "must be run as root (mount, tap and iptables access)".to_string(),
        ));
    }

    Ok(())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var_os(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn env_isize(key: &str, default: isize) -> isize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_with(dir: &std::path::Path, kernel_present: bool) -> Config {
        let touch = |name: &str| {
            let path = dir.join(name);
            fs::write(&path, b"").unwrap();
            path
        };

        let mut config = Config::from_env("unused", 256);
        config.firecracker_bin = touch("firecracker");
        config.rootfs_template = touch("rootfs.ext4");
        config.kernel_path = if kernel_present {
            touch("vmlinux.bin")
        } else {
            dir.join("vmlinux.bin")
        };
        config
    }

    #[test]
    fn validate_accepts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(config_with(dir.path(), true).validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let err = config_with(dir.path(), false).validate().unwrap_err();
        assert!(err.to_string().contains("Kernel image"));
    }
}
