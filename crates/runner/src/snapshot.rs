//! Snapshot create and restore around a pre-warmed guest.
use crate::config::Config;
use firecracker_client::{Firecracker, FirecrackerBuilder};
use log::info;
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "vm_state";
pub const MEM_FILE: &str = "vm_mem";

/// Where one snapshot lives: a directory holding the small state file and
/// the memory file (sized like the guest's RAM).
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub dir: PathBuf,
}

impl SnapshotPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn mem_file(&self) -> PathBuf {
        self.dir.join(MEM_FILE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vmm error: {0}")]
    Vmm(#[from] firecracker_client::Error),
}

/// Pause the instance and persist a full snapshot. The source vmm is
/// always terminated afterwards; only the restore path produces a running
/// vm. A failed create leaves no partial artifacts behind.
pub async fn create(fc: &mut Firecracker, paths: &SnapshotPaths) -> Result<(), SnapshotError> {
    tokio::fs::create_dir_all(&paths.dir).await?;

    info!("pausing vm");
    fc.pause().await?;

    info!("writing snapshot to {}", paths.dir.display());
    let created = fc
        .create_snapshot(&paths.state_file(), &paths.mem_file())
        .await;

    if created.is_err() {
        // The vmm may have written one of the two files before failing.
        let _ = tokio::fs::remove_file(paths.state_file()).await;
        let _ = tokio::fs::remove_file(paths.mem_file()).await;
    }

    fc.shutdown().await;

    created?;
    Ok(())
}

/// Spawn a fresh vmm and resume it straight from the snapshot. No boot
/// source, drive, machine or network calls are issued; those settings are
/// part of the snapshot.
pub async fn restore(config: &Config, paths: &SnapshotPaths) -> Result<Firecracker, SnapshotError> {
    let mut builder = FirecrackerBuilder::new(&config.firecracker_bin);
    builder
        .with_api_socket_path(config.api_socket_path.clone())
        .with_serial_log_path(config.serial_log_path.clone());
    let mut fc = builder.build()?;

    fc.spawn().await?;
    fc.load_snapshot(&paths.state_file(), &paths.mem_file())
        .await?;

    Ok(fc)
}

/// Size of a snapshot artifact on disk.
pub async fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_anchored_in_the_snapshot_dir() {
        let paths = SnapshotPaths::new("/tmp/fc-snapshot");
        assert_eq!(
            paths.state_file(),
            PathBuf::from("/tmp/fc-snapshot/vm_state")
        );
        assert_eq!(paths.mem_file(), PathBuf::from("/tmp/fc-snapshot/vm_mem"));
    }
}
