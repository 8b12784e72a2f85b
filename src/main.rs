use agol_overwrite::cli::{run, Cli};
use agol_overwrite::error::OverwriteError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Workflow errors were already reported with their step by run().
        if e.downcast_ref::<OverwriteError>().is_none() {
            eprintln!("[ERROR] config: {e:#}");
        }
        std::process::exit(1);
    }
}
