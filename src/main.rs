//! rotor - parallel Tor worker pool with a SOCKS-aware HTTP load balancer
//!
//! rotor supervises N Tor worker processes, assigns each a slice of exit
//! relays pulled from a directory service, and load-balances client HTTP and
//! CONNECT traffic across whichever workers are currently healthy. Runs in
//! the foreground; there is no daemon-fork or persisted-PID-file mode.

use anyhow::Result;

use rotor::check;
use rotor::cli::{Cli, Commands};
use rotor::config::Config;
use rotor::integrator;
use rotor::logging;

async fn run_with_command(command: Commands) -> Result<()> {
    match command {
        Commands::Start {
            config,
            log_file,
            verbose,
        } => {
            logging::init_logging(verbose, log_file.as_deref())?;
            log::info!("rotor v{} starting", env!("CARGO_PKG_VERSION"));

            let config_path = Config::resolve_config_path(config.as_deref())?;
            let loaded = Config::load(&config_path).await?;
            log::info!("configuration loaded: {}", config_path.display());
            log::info!("  - workers: {}", loaded.worker_count);
            log::info!("  - frontend: {}", loaded.frontend_listen);

            let exit_code = integrator::run(loaded).await;
            std::process::exit(exit_code);
        }
        Commands::Check { config, json } => {
            check::run_and_print(config, json).await?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_with_command(cli.command))
}
