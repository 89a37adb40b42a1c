use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use evo_mcp_runtime::McpCommands;

#[derive(Parser)]
#[command(
    name = "evo-mcp",
    version,
    about = "Evo MCP server: workspace, object and CSV import tools over stdio"
)]
struct Cli {
    #[command(subcommand)]
    command: McpCommands,
}

// stdout carries protocol frames, so every log line goes to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "evo_mcp=info,evo_mcp_runtime=info".into());
    let json = std::env::var("EVO_LOG_JSON").is_ok_and(|value| value == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let code = evo_mcp_runtime::run(cli.command).await;
    std::process::exit(code);
}
