// forgeloop CLI
//
// Design Decision: clap derive for ergonomic argument parsing.
// Design Decision: text/json/yaml output formats for scripting.

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "forgeloop")]
#[command(about = "forgeloop CLI - manage CI-loop workflows")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(long, env = "FORGELOOP_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflows
    Workflow {
        #[command(subcommand)]
        command: commands::workflow::WorkflowCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = client::Client::new(&cli.api_url);
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Workflow { command } => {
            commands::workflow::run(command, &client, output_format, cli.quiet).await
        }
    }
}
