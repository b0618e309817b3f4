mod error;
mod remux;
mod utils;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use hlsdl_engine::{DownloaderConfig, HlsConfig, HlsDownloader, HlsEvent};
use indicatif::{HumanBytes, HumanDuration, ProgressStyle};
use mimalloc::MiMalloc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, Span, debug, error, info, info_span, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;
use crate::utils::parse_headers;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download an HLS media playlist and remux it to mp4", long_about = None)]
struct Args {
    /// Media playlist URL
    url: String,

    /// Output path without file extension
    #[arg(short, long)]
    output: PathBuf,

    /// Maximum number of parallel segment downloads
    #[arg(short = 'j', long = "max-concurrent-downloads", default_value_t = 8)]
    max_concurrent_downloads: usize,

    /// Add a custom HTTP header (FIELD:VALUE); may be repeated
    #[arg(short = 'H', long = "add-header", value_name = "FIELD:VALUE")]
    add_header: Vec<String>,

    /// Overall timeout per HTTP request in seconds (0 disables it)
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Skip ffmpeg and write a raw .ts file
    #[arg(long)]
    no_remux: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .init();
}

async fn run(args: Args) -> Result<(), AppError> {
    let headers = parse_headers(&args.add_header)?;
    let base = DownloaderConfig::default()
        .with_headers(headers)
        .with_timeout(Duration::from_secs(args.timeout));
    let config = HlsConfig::default()
        .with_base(base)
        .with_max_concurrent(args.max_concurrent_downloads);
    let downloader = HlsDownloader::new(config)?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Cancellation requested. Shutting down gracefully...");
                token.cancel();
            }
        }
    });

    let span = info_span!("download");
    span.pb_set_style(&progress_style());
    span.pb_set_message("fetching manifest");
    let progress = tokio::spawn(report_progress(downloader.subscribe(), span.clone()));

    info!(url = %args.url, "Downloading...");
    let result = downloader
        .run_with_cancellation(args.url.trim(), token)
        .instrument(span.clone())
        .await;
    progress.abort();
    drop(span);
    let report = result?;

    info!(
        "Downloaded {} segments ({}) in {}",
        report.successful_indices().len(),
        HumanBytes(report.total_bytes() as u64),
        HumanDuration(report.elapsed())
    );
    if !report.is_complete() {
        for failure in report.failures() {
            warn!(index = failure.index, error = %failure.error, "Segment missing from output");
        }
    }
    if report.successful_indices().is_empty() {
        return Err(AppError::NothingDownloaded);
    }

    let path = remux::write_output(report.into_segments(), &args.output, !args.no_remux).await?;
    info!(path = %path.display(), "done.");
    Ok(())
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{span_child_prefix}{spinner:.yellow} [{bar:30.yellow/white}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

/// Mirror session events onto the span's progress bar.
async fn report_progress(mut events: broadcast::Receiver<HlsEvent>, span: Span) {
    loop {
        match events.recv().await {
            Ok(HlsEvent::ManifestReady { segments }) => {
                span.pb_set_length(segments as u64);
                span.pb_set_position(0);
            }
            Ok(HlsEvent::Progress(snapshot)) => {
                span.pb_set_position(snapshot.completed as u64);
                span.pb_set_message(&format!(
                    "{} | {}/s",
                    HumanBytes(snapshot.received_bytes),
                    HumanBytes(snapshot.avg_speed as u64)
                ));
            }
            Ok(HlsEvent::SessionFinished { elapsed }) => {
                span.pb_set_finish_message(&format!("finished in {}", HumanDuration(elapsed)));
                break;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress reporter lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
