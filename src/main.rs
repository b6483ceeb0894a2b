mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use terracache::{api, definitions::DefinitionSet};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => api::run(args.address, args.config).await?,
        Commands::Validate { file } => {
            let text = std::fs::read_to_string(&file)?;
            let set = DefinitionSet::parse(&text)?;
            println!(
                "{}: {} provider block(s), {} download item(s)",
                file.display(),
                set.blocks.len(),
                set.item_count()
            );
            for block in &set.blocks {
                println!(
                    "  {} ({} versions x {} platforms)",
                    block.source(),
                    block.versions.len(),
                    block.platforms.len()
                );
            }
        }
    }

    Ok(())
}
