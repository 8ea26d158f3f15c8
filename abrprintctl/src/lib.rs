mod output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use reqwest::cookie::Jar;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use abrprint_core::geolocate::{self, GeolocateError};
use abrprint_core::{
    Amazon, AppConfig, DefaultService, FormatFilter, HostLimits, ServiceError, ServiceManager,
    Svt, Transport, TransportError,
};

use output::{drain_output, JsonWriter, OutputEntry, OutputPayload};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    #[error("no country code set and geolocation failed: {0}")]
    Geolocate(#[from] GeolocateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Extract catalog URLs from streaming services and fingerprint ABR renditions",
    long_about = None
)]
pub struct Cli {
    /// Output directory for extracted data. Created if it doesn't exist
    #[arg(long, env = "OUT_DIR", default_value = ".", global = true)]
    pub out_dir: PathBuf,
    /// Don't indent (beautify) JSON output
    #[arg(long, env = "NO_INDENT", global = true)]
    pub no_indent: bool,
    /// Two-letter (alpha-2) country code. Recommended to set in alignment
    /// with the IP location due to potential geo-blocking; resolved by a
    /// geolocation lookup when unset
    #[arg(long, env = "COUNTRY_CODE", global = true)]
    pub country_code: Option<String>,
    /// Cookies to send with each request to a host, for example
    /// --cookies www.example.com="session=1; token=xyz",api.io="auth=abc"
    #[arg(
        long,
        env = "COOKIES",
        value_delimiter = ',',
        value_parser = parse_cookie_entry,
        value_name = "HOST=COOKIES,...",
        global = true
    )]
    pub cookies: Vec<(String, String)>,
    /// Rate limit outbound requests per second for the given hosts.
    /// Restrictive defaults exist for known services; a negative value
    /// disables one (not recommended)
    #[arg(
        long,
        env = "RATE_LIMIT",
        value_delimiter = ',',
        value_parser = parse_rate_entry,
        value_name = "HOST=LIMIT,...",
        global = true
    )]
    pub rate_limit: Vec<(String, i64)>,
    /// Enable verbose logging (additional error details)
    #[arg(long, env = "VERBOSE", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract all available URLs from a service that may link to videos,
    /// shows or movies
    ExtractUrls {
        /// Service to extract URLs from
        service: String,
    },
    /// Extract and fingerprint service-specific URLs. Authentication
    /// cookies may be required (set via --cookies)
    Extract {
        /// URLs to extract. They don't have to be from the same service
        #[arg(required = true)]
        urls: Vec<String>,
        /// Limit fingerprinting to a specific ABR format
        #[arg(long, value_enum, default_value_t = FormatArg::Dash)]
        format: FormatArg,
    },
    /// Fingerprint a file or resource on the web. Must be an MPD, M3U8 or
    /// fragmented MP4 file
    Fingerprint {
        /// File or URL to fingerprint
        file_or_url: String,
        /// Base URL for manifest files, required if not contained within
        /// the manifest
        #[arg(long)]
        base_url: Option<String>,
        /// Byte range of the index segment in the fragmented MP4 file;
        /// the first 64 KB are read when unset
        #[arg(long)]
        index_range: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Dash,
    Hls,
    Both,
}

impl From<FormatArg> for FormatFilter {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Dash => FormatFilter::Dash,
            FormatArg::Hls => FormatFilter::Hls,
            FormatArg::Both => FormatFilter::Both,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);

    let jar = build_cookie_jar(&cli.cookies)?;
    let mut limits = HostLimits::with_defaults();
    limits.apply_overrides(cli.rate_limit.iter().map(|(host, limit)| (host.as_str(), *limit)));
    let transport = Transport::new(jar, limits)?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let country_code = resolve_country_code(&cli, &transport, &cancel).await?;
    let config = Arc::new(AppConfig {
        country_code,
        out_dir: cli.out_dir.clone(),
        no_indent: cli.no_indent,
        verbose: cli.verbose,
    });

    let mut manager = ServiceManager::new(DefaultService::new(transport.clone()));
    manager.register(Arc::new(Amazon::new(config.clone(), transport.clone())?))?;
    manager.register(Arc::new(Svt::new(config.clone(), transport.clone())?))?;
    let manager = Arc::new(manager);

    let writer = JsonWriter::new(&config.out_dir, config.no_indent)?;
    let (sender, receiver) = mpsc::channel::<OutputEntry>(16);
    let writer_task = tokio::spawn(drain_output(
        writer,
        receiver,
        config.clone(),
        cancel.clone(),
    ));

    match &cli.command {
        Commands::ExtractUrls { service } => {
            let payload = manager
                .extract_urls(service, &cancel)
                .await
                .map(OutputPayload::Urls);
            let _ = sender
                .send(OutputEntry {
                    payload,
                    prefix: "urls_",
                    suffix: String::new(),
                })
                .await;
        }
        Commands::Extract { urls, format } => {
            let parallelism = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            let format = FormatFilter::from(*format);

            futures::stream::iter(urls.iter().enumerate().map(|(index, url)| {
                let manager = manager.clone();
                let sender = sender.clone();
                let cancel = cancel.clone();
                async move {
                    let payload = manager
                        .extract(url, format, &cancel)
                        .await
                        .map(|result| OutputPayload::Extract(Box::new(result)));
                    let _ = sender
                        .send(OutputEntry {
                            payload,
                            prefix: "extract_",
                            suffix: format!("_{index:05}"),
                        })
                        .await;
                }
            }))
            .buffer_unordered(parallelism)
            .collect::<Vec<()>>()
            .await;
        }
        Commands::Fingerprint {
            file_or_url,
            base_url,
            index_range,
        } => {
            let payload = manager
                .fingerprint_file(
                    file_or_url,
                    base_url.as_deref().unwrap_or_default(),
                    index_range.as_deref().unwrap_or_default(),
                    &cancel,
                )
                .await
                .map(OutputPayload::Fingerprint);
            let _ = sender
                .send(OutputEntry {
                    payload,
                    prefix: "fingerprint_",
                    suffix: String::new(),
                })
                .await;
        }
    }

    // The sink closes last, after all in-flight sends complete.
    drop(sender);
    let _ = writer_task.await;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn build_cookie_jar(cookies: &[(String, String)]) -> Result<Arc<Jar>> {
    let jar = Jar::default();
    for (host, value) in cookies {
        let url = Url::parse(&format!("https://{host}"))
            .map_err(|_| AppError::InvalidArgument(format!("invalid cookie host {host:?}")))?;
        for cookie in value.split(';') {
            let cookie = cookie.trim();
            if !cookie.is_empty() {
                jar.add_cookie_str(cookie, &url);
            }
        }
    }
    Ok(Arc::new(jar))
}

async fn resolve_country_code(
    cli: &Cli,
    transport: &Transport,
    cancel: &CancellationToken,
) -> Result<String> {
    let code = cli
        .country_code
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_uppercase();
    if !code.is_empty() {
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::InvalidArgument(format!(
                "invalid two-letter country code {code:?}"
            )));
        }
        return Ok(code);
    }
    Ok(geolocate::country_code(transport, cancel).await?)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let signals = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (Ok(mut interrupt), Ok(mut terminate), Ok(mut hangup)) = signals else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = hangup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn parse_cookie_entry(entry: &str) -> std::result::Result<(String, String), String> {
    let (host, cookies) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected HOST=COOKIES, got {entry:?}"))?;
    if host.trim().is_empty() {
        return Err(format!("empty host in {entry:?}"));
    }
    Ok((host.trim().to_string(), cookies.to_string()))
}

fn parse_rate_entry(entry: &str) -> std::result::Result<(String, i64), String> {
    let (host, limit) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected HOST=LIMIT, got {entry:?}"))?;
    let limit = limit
        .trim()
        .parse()
        .map_err(|_| format!("invalid limit in {entry:?}"))?;
    if host.trim().is_empty() {
        return Err(format!("empty host in {entry:?}"));
    }
    Ok((host.trim().to_string(), limit))
}
