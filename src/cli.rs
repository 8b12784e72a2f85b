use crate::config::OverwriteConfig;
use crate::http::ReqwestBackend;
use crate::load_config::load_config;
use crate::locator::is_root_folder;
use crate::progress::StdoutProgress;
use crate::error::Step;
use crate::workflow::overwrite;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for agol-overwrite: replace a hosted feature layer's data and republish it.
#[derive(Parser)]
#[clap(
    name = "agol-overwrite",
    version,
    about = "Overwrite a hosted feature layer on ArcGIS Online from a zipped shapefile"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload, publish and share the payload named in the config file
    Overwrite {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Validate the config file and print the resolved settings
    CheckConfig {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// The resolved settings, with secrets left out.
pub fn describe_config(config: &OverwriteConfig) -> String {
    let folder = match config.target.folder.as_deref() {
        Some(f) if !is_root_folder(Some(f)) => f,
        _ => "<root>",
    };
    let max_wait = config
        .polling
        .upload
        .max_wait
        .map_or_else(|| "none".to_string(), |w| format!("{w:?}"));
    format!(
        "portal:     {base}\n\
         username:   {user}\n\
         password:   <redacted>\n\
         service:    {service}\n\
         owner:      {owner}\n\
         folder:     {folder}\n\
         payload:    {payload}\n\
         chunk size: {chunk}\n\
         polling:    upload {upload:?}, publish {publish:?}, max wait {max_wait}\n\
         retries:    {retries} (back-off {backoff:?})\n\
         sharing:    {sharing}",
        base = config.portal.base_url,
        user = config.credentials.username,
        service = config.target.service_name,
        owner = config.owner(),
        payload = config.payload.path.display(),
        chunk = config.payload.chunk_size,
        upload = config.polling.upload.interval,
        publish = config.polling.publish.interval,
        retries = config.retries.max_retries,
        backoff = config.retries.backoff,
        sharing = if config.sharing.enabled {
            format!(
                "everyone={}, org={}, groups=[{}]",
                config.sharing.policy.everyone,
                config.sharing.policy.org,
                config.sharing.policy.groups_param()
            )
        } else {
            "disabled".to_string()
        },
    )
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Overwrite { config } => {
            let config = load_config(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            let backend = ReqwestBackend::new(config.portal.http_timeout).map_err(|e| {
                eprintln!("[ERROR] http client: {e}");
                anyhow::Error::from(e)
            })?;
            println!("Overwrite of {} starting...", config.target.service_name);
            match overwrite(&config, backend, &StdoutProgress).await {
                Ok(report) => {
                    println!("Overwrite complete.\nReport:");
                    println!("{:#?}", report);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] {}: {}", e.step().map_or("run", Step::as_str), e);
                    if let Some(payload) = e.payload() {
                        eprintln!("[ERROR] server response: {payload}");
                    }
                    Err(anyhow::Error::from(e))
                }
            }
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            println!("Config OK.\n{}", describe_config(&config));
            Ok(())
        }
    }
}
