use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pdl::server::{Faults, ServeArgs, startup};
use pdl::utils::cleanup::CleanupScope;
use pdl::{DownloadOptions, Downloader, terminator};

#[derive(Parser)]
#[command(name = "pdl")]
#[command(about = "Download a file over HTTP by fetching byte ranges in parallel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download URL with parallel range requests
    Get {
        #[arg(short, long, help = "parallelism", default_value_t = 8)]
        parallelism: usize,
        #[arg(short, long, help = "output file (default: last path segment of the URL)")]
        output: Option<PathBuf>,
        #[arg(
            short,
            long,
            help = "overall timeout, 0s to disable",
            default_value = "60s",
            value_parser = humantime::parse_duration
        )]
        timeout: Duration,
        url: String,
    },
    /// Serve one file with byte-range support, for trying `get` locally
    Serve {
        #[arg(short, long, help = "file to serve")]
        file: PathBuf,
        #[arg(long, help = "Address to bind to", default_value = "127.0.0.1")]
        address: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(
            long,
            help = "delay before every response",
            default_value = "0s",
            value_parser = humantime::parse_duration
        )]
        delay: Duration,
        #[arg(
            long,
            help = "percentage of GET requests answered with 500",
            default_value_t = 0,
            value_parser = clap::value_parser!(u8).range(0..=100)
        )]
        failure_probability: u8,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Get {
            parallelism,
            output,
            timeout,
            url,
        } => {
            let options = DownloadOptions::resolve(&url, parallelism, output, timeout)?;
            get(options).await?;
        }
        Commands::Serve {
            file,
            address,
            port,
            delay,
            failure_probability,
        } => {
            startup(ServeArgs {
                file,
                address,
                port,
                faults: Faults {
                    delay,
                    failure_probability,
                },
            })
            .await?;
        }
    }

    Ok(())
}

async fn get(options: DownloadOptions) -> anyhow::Result<()> {
    let scope = Arc::new(CleanupScope::new());
    let token = CancellationToken::new();
    let listener = terminator::listen(token.clone(), &scope);

    let client = reqwest::Client::builder()
        .user_agent(concat!("pdl/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let downloader = Downloader::new(client, Arc::clone(&scope));

    let result = downloader.download(&options, &token).await;

    listener.abort();
    if let Err(errs) = scope.run_all() {
        warn!(error = %errs, "cleanup failed");
    }

    match result {
        Ok(done) => {
            info!(
                path = %done.path.display(),
                bytes = done.bytes,
                ranges = done.ranges,
                "saved"
            );
            Ok(())
        }
        Err(err) => {
            if err.is_cancellation() {
                warn!("{}", err);
            }
            Err(err.into())
        }
    }
}
