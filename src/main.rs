use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use apibridge::ctrl::{Ctrl, CtrlOption};
use apibridge::logging::init_logging;
use apibridge::mockserver::ServerOption;

/// Differential API-mapping harness: runs client programs against a mock
/// server synthesizing unique response values from Swagger specs, and maps
/// each property in the client's output back to the schema property that
/// produced it.
#[derive(Parser)]
#[command(name = "apibridge", version)]
struct Cli {
    /// Mock server address
    #[arg(long, default_value = "localhost")]
    addr: String,

    /// Mock server port
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Execution config file
    #[arg(long)]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Swagger specification directory
    #[arg(long)]
    specdir: PathBuf,

    /// Operation index file
    #[arg(long)]
    index: PathBuf,

    /// Continue with the remaining executions when one fails
    #[arg(short = 'k', long)]
    continue_on_error: bool,

    /// Run from the given execution (inclusive), in form of `name.type`
    #[arg(long, default_value = "")]
    from: String,

    /// Run until the given execution (exclusive), in form of `name.type`
    #[arg(long, default_value = "")]
    to: String,

    /// Mock server request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!("{:#}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<()> {
    init_logging(&cli.log_level)?;

    let mut ctrl = Ctrl::new(CtrlOption {
        config_file: cli.config,
        continue_on_err: cli.continue_on_error,
        server_option: ServerOption {
            addr: cli.addr,
            port: cli.port,
            index: cli.index,
            specdir: cli.specdir,
            timeout: std::time::Duration::from_secs(cli.timeout),
        },
        exec_from: cli.from,
        exec_to: cli.to,
    })?;

    ctrl.run().await
}
