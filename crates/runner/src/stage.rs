//! Per-invocation rootfs staging: clone the template image, mount it,
//! inject the function and its input, unmount.
use crate::cmd::{CommandError, run_checked};
use log::info;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use tokio_retry::{
    Retry,
    strategy::{ExponentialBackoff, jitter},
};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Command(#[from] CommandError),
}

/// Writable copy of the guest image owned by exactly one invocation.
/// The backing file path is never reused; each clone gets a fresh
/// temporary name.
#[derive(Debug)]
pub struct StagedDisk {
    path: PathBuf,
}

impl StagedDisk {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Copy the template image to a unique temporary path. The template stays
/// pristine; all writes go to the clone.
pub async fn clone_template(template: &Path) -> Result<StagedDisk, StageError> {
    let staged = tempfile::Builder::new()
        .prefix("nano-lambda-rootfs-")
        .suffix(".ext4")
        .tempfile()?;
    let (_, path) = staged.keep().map_err(|e| e.error)?;

    info!("cloning rootfs template {}", template.display());
    if let Err(e) = tokio::fs::copy(template, &path).await {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e.into());
    }

    Ok(StagedDisk { path })
}

/// Produce a staged disk containing the function and its input.
///
/// On success the returned image is self-contained and safe to hand to
/// the vmm; on any failure the staged copy is destroyed before the error
/// surfaces.
pub async fn stage(
    template: &Path,
    function_path: &Path,
    input: &[u8],
) -> Result<StagedDisk, StageError> {
    let staged = clone_template(template).await?;

    match inject(&staged, function_path, input).await {
        Ok(()) => Ok(staged),
        Err(e) => {
            let _ = tokio::fs::remove_file(staged.path()).await;
            Err(e)
        }
    }
}

async fn inject(staged: &StagedDisk, function_path: &Path, input: &[u8]) -> Result<(), StageError> {
    let mount_point = tempdir()?.keep();

    let result = mount_and_write(staged.path(), &mount_point, function_path, input).await;

    // The mount point directory goes away on every path.
    let _ = tokio::fs::remove_dir(&mount_point).await;

    result
}

async fn mount_and_write(
    image: &Path,
    mount_point: &Path,
    function_path: &Path,
    input: &[u8],
) -> Result<(), StageError> {
    info!("mounting staged rootfs");
    run_checked("mount", [image.as_os_str(), mount_point.as_os_str()]).await?;

    let written = write_payload(mount_point, function_path, input).await;

    // The image must be cleanly unmounted before the vmm opens it; a busy
    // mount right after the writes is transient.
    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
    let unmounted = Retry::spawn(retry_strategy, || {
        run_checked("umount", [mount_point.as_os_str()])
    })
    .await
    .map_err(StageError::from);

    written.and(unmounted)
}

async fn write_payload(
    mount_point: &Path,
    function_path: &Path,
    input: &[u8],
) -> Result<(), StageError> {
    let functions_dir = mount_point.join("functions");

    info!("injecting function {}", function_path.display());
    tokio::fs::copy(
        function_path,
        functions_dir.join(handler_file_name(function_path)),
    )
    .await?;

    tokio::fs::write(functions_dir.join("input.txt"), input).await?;

    Ok(())
}

/// The guest init runs `/functions/handler`; the staged copy keeps the
/// source extension so the template's runtime dispatch keeps working.
fn handler_file_name(function_path: &Path) -> String {
    match function_path.extension() {
        Some(ext) => format!("handler.{}", ext.to_string_lossy()),
        None => "handler".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_keeps_source_extension() {
        assert_eq!(handler_file_name(Path::new("demo/qrcode.py")), "handler.py");
        assert_eq!(handler_file_name(Path::new("validate.js")), "handler.js");
        assert_eq!(handler_file_name(Path::new("handler")), "handler");
    }

    #[tokio::test]
    async fn clone_template_yields_unique_paths() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.ext4");
        tokio::fs::write(&template, b"image bytes").await.unwrap();

        let first = clone_template(&template).await.unwrap();
        let second = clone_template(&template).await.unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(
            tokio::fs::read(first.path()).await.unwrap(),
            b"image bytes"
        );

        let _ = tokio::fs::remove_file(first.path()).await;
        let _ = tokio::fs::remove_file(second.path()).await;
    }

    #[tokio::test]
    async fn missing_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("nope.ext4");

        assert!(clone_template(&template).await.is_err());
    }
}
