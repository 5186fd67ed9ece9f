//! Run a function inside a micro-VM with internet egress through the
//! host's TAP + NAT setup.
use clap::Parser;
use log::info;
use runner::config::Config;
use runner::lifecycle::{self, InvocationRequest, ResourceTracker};
use runner::{render, signals};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "nano-lambda-network",
    about = "Run a function inside a micro-VM with internet access"
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

    let config = Config::from_env("./rootfs-network.ext4", 256);
    let tracker = ResourceTracker::new();
    signals::install(tracker.clone());

    info!(
        "invoking {} (input: {})",
        args.function.display(),
        elide(&args.input)
    );
    let request = InvocationRequest {
        function_path: args.function,
        input: args.input.into_bytes(),
        networking: true,
        timeout: lifecycle::default_timeout(true),
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

fn elide(input: &str) -> String {
    if input.chars().count() > 50 {
        format!("{}...", input.chars().take(50).collect::<String>())
    } else {
        input.to_string()
    }
}
