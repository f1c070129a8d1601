//! CLI entry point for segctl.

use clap::Parser;
use cli::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::parse();
    let result = config.run().await?;
    if config.json {
        println!("{}", result.to_json()?);
    } else {
        print!("{result}");
    }
    Ok(())
}
