//! Run a function inside an isolated micro-VM and print its result.
use clap::Parser;
use log::info;
use runner::config::Config;
use runner::lifecycle::{self, InvocationRequest, ResourceTracker};
use runner::{render, signals};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "nano-lambda",
    about = "Run a function inside an isolated micro-VM"
)]
struct Args {
    /// Function source file injected into the guest
    function: PathBuf,
    /// Input handed to the function via /functions/input.txt
    input: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = Config::from_env("./rootfs-python.ext4", 256);
    let tracker = ResourceTracker::new();
    signals::install(tracker.clone());

    info!("invoking {} in a micro-VM", args.function.display());
    let request = InvocationRequest {
        function_path: args.function,
        input: args.input.into_bytes(),
        networking: false,
        timeout: lifecycle::default_timeout(false),
    };

    match lifecycle::invoke(&config, &request, &tracker).await {
        Ok(output) => {
            render::render(&output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
