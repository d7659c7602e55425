use clap::{Parser, Subcommand};

/// agentflow: real-time observability service for AI-agent coding
/// sessions. Namespaced subcommands.
#[derive(Debug, Parser)]
#[command(name = "agentflow-server", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP/WebSocket server and the background schedulers.
    Serve,
    /// Open the configured database and ensure its schema is current.
    Migrate,
    /// Run integrity checks against the configured database.
    Doctor,
}
