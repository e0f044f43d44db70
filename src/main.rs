use clap::Parser;
use dotenv::dotenv;

use selfheal::cli::{Cli, Commands, RunCliConfig};
use selfheal::commands::{run_check_config, run_default_config, run_selfheal};
use selfheal::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.verbose, cli.json_logs) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Run {
            config,
            health_port,
            sandbox,
            journal,
        } => {
            run_selfheal(RunCliConfig {
                config_path: config,
                health_port,
                sandbox,
                journal,
            })
            .await?
        }
        Commands::CheckConfig { config } => run_check_config(&config)?,
        Commands::DefaultConfig => run_default_config()?,
    }
    Ok(())
}
