//! Provisio CLI: declarative, idempotent machine provisioning.

use clap::Parser;
use provisio::core::runner::CancelFlag;

#[derive(Parser, Debug)]
#[command(
    name = "provisio",
    version,
    about = "Declarative machine provisioning: ordered steps, explicit checks, safe re-runs"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: provisio::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    provisio::cli::init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };

    // Interrupts are honored between steps. A second one stops the running
    // script, removes any build scratch directory, and exits.
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current step");
            flag.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            provisio::transport::local::interrupt_active();
            provisio::resources::build::discard_active_scratch();
            eprintln!("error: interrupted");
            std::process::exit(130);
        }
    });

    let result = runtime.block_on(async move {
        tokio::task::spawn_blocking(move || provisio::cli::dispatch(cli.command, cancel))
            .await
            .unwrap_or_else(|e| Err(format!("worker panicked: {}", e)))
    });

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
