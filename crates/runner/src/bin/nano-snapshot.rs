//! Cold-start vs snapshot-restore timing tool.
//!
//! Boots the pre-warmed-runtime template, waits for the guest's
//! `SNAPSHOT_READY` handshake, pauses and snapshots the vm, then restores
//! the snapshot into a fresh vmm and compares the two paths.
use clap::Parser;
use firecracker_client::dto::{BootSource, Drive, MachineConfiguration};
use firecracker_client::{Firecracker, FirecrackerBuilder};
use protocol::frame;
use runner::config::{Config, SNAPSHOT_BOOT_ARGS, ValidationError, ensure_root};
use runner::lifecycle::ResourceTracker;
use runner::serial::{self, DEFAULT_STABILITY_WINDOW, ReadyPolicy};
use runner::signals;
use runner::snapshot::{self, SnapshotError, SnapshotPaths};
use runner::stage::{self, StageError};
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::Instant;

const READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "nano-snapshot",
    about = "Compare micro-VM cold start against snapshot restore"
)]
struct Args {}

#[derive(Debug, thiserror::Error)]
enum ToolError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Staging error: {0}")]
    Stage(#[from] StageError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Vmm error: {0}")]
    Vmm(#[from] firecracker_client::Error),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let _args = Args::parse();

    let config = Config::from_env("./rootfs-sklearn.ext4", 512);
    let tracker = ResourceTracker::new();
    signals::install(tracker.clone());

    let mut vmm = None;
    let result = run(&config, &tracker, &mut vmm).await;

    // Whichever vmm generation is still alive goes down with the rest.
    if let Some(mut fc) = vmm.take() {
        fc.shutdown().await;
    }
    tracker.clear_vmm();
    for path in tracker.take_paths() {
        let _ = tokio::fs::remove_file(&path).await;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: &Config,
    tracker: &ResourceTracker,
    vmm: &mut Option<Firecracker>,
) -> Result<(), ToolError> {
    ensure_root()?;
    config.validate()?;

    // Leftovers from an aborted earlier run.
    let _ = tokio::fs::remove_file(&config.api_socket_path).await;
    let _ = tokio::fs::remove_dir_all(&config.snapshot_dir).await;

    println!("[1] cold start (boot + runtime warmup)");
    let cold_timer = Instant::now();

    let staged = stage::clone_template(&config.rootfs_template).await?;
    tracker.track_staged_disk(staged.path().to_path_buf());
    println!(
        "    rootfs staged ({:.3}s)",
        cold_timer.elapsed().as_secs_f64()
    );

    tracker.track_api_socket(config.api_socket_path.clone());
    tracker.track_serial_log(config.serial_log_path.clone());

    let mut builder = FirecrackerBuilder::new(&config.firecracker_bin);
    builder
        .with_api_socket_path(config.api_socket_path.clone())
        .with_serial_log_path(config.serial_log_path.clone());
    let fc = vmm.insert(builder.build()?);

    fc.spawn().await?;
    tracker.track_vmm(fc.pid());
    println!(
        "    firecracker up ({:.3}s)",
        cold_timer.elapsed().as_secs_f64()
    );

    fc.set_boot_source(BootSource {
        boot_args: Some(SNAPSHOT_BOOT_ARGS.to_string()),
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
    fc.configure().await?;
    println!(
        "    vm configured ({:.3}s)",
        cold_timer.elapsed().as_secs_f64()
    );

    fc.start().await?;
    println!("    vm started, waiting for {}", frame::SNAPSHOT_READY);

    // Best effort: a first boot can exceed any window, and a late snapshot
    // still beats no snapshot.
    serial::wait_for_ready(
        &config.serial_log_path,
        frame::SNAPSHOT_READY,
        READY_TIMEOUT,
        DEFAULT_STABILITY_WINDOW,
        ReadyPolicy::BestEffort,
    )
    .await?;

    let cold = cold_timer.elapsed();
    println!("\n    >>> cold start total: {:.3}s", cold.as_secs_f64());

    // Echo the guest's own timing lines for the operator.
    let boot_log = serial::read_log(&config.serial_log_path).await?;
    for line in boot_log.lines() {
        if line.contains("[TIMING]") || line.contains("[READY]") {
            println!("    {line}");
        }
    }

    println!("\n[2] creating snapshot");
    let snapshot_timer = Instant::now();
    let paths = SnapshotPaths::new(&config.snapshot_dir);
    snapshot::create(fc, &paths).await?;
    let snapshot_time = snapshot_timer.elapsed();
    println!(
        "    snapshot written ({:.3}s)",
        snapshot_time.as_secs_f64()
    );

    let mem_size = snapshot::file_size(&paths.mem_file()).await?;
    let state_size = snapshot::file_size(&paths.state_file()).await?;
    println!(
        "    memory: {:.1} MiB | state: {:.1} KiB",
        mem_size as f64 / (1024.0 * 1024.0),
        state_size as f64 / 1024.0
    );

    // The source vmm was terminated by the snapshot; forget it.
    *vmm = None;
    tracker.clear_vmm();

    println!("\n[3] restoring snapshot");
    let restore_timer = Instant::now();
    let restored = snapshot::restore(config, &paths).await?;
    let restore_time = restore_timer.elapsed();
    tracker.track_vmm(restored.pid());
    *vmm = Some(restored);
    println!("    >>> restore total: {:.3}s", restore_time.as_secs_f64());

    println!("\n========================================");
    println!("  cold start:      {:.3}s", cold.as_secs_f64());
    println!("  snapshot create: {:.3}s", snapshot_time.as_secs_f64());
    println!("  restore:         {:.3}s", restore_time.as_secs_f64());
    println!(
        "  speedup:         {:.1}x",
        cold.as_secs_f64() / restore_time.as_secs_f64()
    );
    println!(
        "  saved per run:   {:.3}s",
        cold.as_secs_f64() - restore_time.as_secs_f64()
    );
    println!("========================================");

    Ok(())
}
