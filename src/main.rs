use emberchain::cli::commands::run_cli;
use emberchain::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    run_cli(config).await?;

    Ok(())
}
