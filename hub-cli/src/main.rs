use clap::Parser;
use hub_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    hub_cli::run_main(cli).await
}
