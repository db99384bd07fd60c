use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logseq_mcp_runtime::config::DEFAULT_API_URL;
use logseq_mcp_runtime::{McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "logseq-mcp",
    version,
    about = "Logseq MCP server over stdio"
)]
struct Cli {
    /// Logseq HTTP API base URL
    #[arg(long, env = "LOGSEQ_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Logseq HTTP API authorization token
    #[arg(long, env = "LOGSEQ_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries protocol frames, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logseq_mcp=info,logseq_mcp_runtime=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let code = run_mcp(&cli.api_url, cli.token, cli.command).await;
    std::process::exit(code);
}
