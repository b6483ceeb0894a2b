use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "terracache")]
#[command(about = "Caching mirror for Terraform provider plugins", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the mirror service
    Serve(ServeArgs),

    /// Parse a definitions file and report what it would load
    Validate {
        /// Path to the definitions file
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the server to (overrides configuration)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
