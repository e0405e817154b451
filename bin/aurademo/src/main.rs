mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "aurademo")]
#[command(about = "Live AI-narrated product demos in a real browser", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one demo session in this terminal (type to talk, Ctrl-C to end)
    Run {
        /// Product id from the config's product registry
        #[arg(short, long)]
        product: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Start the observer gateway; each WebSocket client gets its own session
    Serve {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show current configuration status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { product, headed } => {
            commands::run::run(product, headed).await?;
        }
        Commands::Serve { port, host } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
    }

    Ok(())
}
