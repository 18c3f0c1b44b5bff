/// Hermes Downloader - command line entry point
///
/// Resolves a source, fetches it in parallel byte ranges, reassembles it and
/// transcodes the result.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::HumanBytes;
use tracing::{error, info};

use hermes_downloader::progress::ProgressReporter;
use hermes_downloader::tools::{discover_extra_paths, ToolRunner};
use hermes_downloader::{
    DirectResolver, Downloader, DownloaderConfig, FfmpegTranscoder, NoopTranscoder, ReqwestSource,
    Resolver, Transcoder, YtDlpResolver,
};
use hermes_shared::HermesError;

/// Segmented parallel downloader with yt-dlp resolution and ffmpeg transcoding.
#[derive(Parser, Debug)]
#[command(name = "hermes-dl", author, version, about, long_about = None)]
struct Cli {
    /// Video page or direct media URL.
    source: String,

    /// Number of byte ranges to split the resource into.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum concurrent range requests.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Retries per failed segment.
    #[arg(long)]
    retries: Option<u32>,

    /// Directory for the finished file.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Treat SOURCE as a direct URL instead of resolving it with yt-dlp.
    #[arg(long)]
    direct: bool,

    /// Keep the merged file as is instead of transcoding it.
    #[arg(long)]
    no_transcode: bool,

    /// Keep the merged file after transcoding.
    #[arg(long)]
    keep_source: bool,

    /// Keep segment files when the fetch fails.
    #[arg(long)]
    keep_temp: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut DownloaderConfig) -> anyhow::Result<()> {
        if let Some(workers) = self.workers {
            anyhow::ensure!(workers > 0, "--workers must be at least 1");
            config.workers = workers;
        }
        if let Some(max) = self.max_connections {
            anyhow::ensure!(max > 0, "--max-connections must be at least 1");
            config.max_connections = Some(max);
        }
        if let Some(retries) = self.retries {
            config.segment_retries = retries;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        config.keep_source |= self.keep_source;
        config.keep_temp |= self.keep_temp;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hermes_downloader=info,hermes_shared=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = DownloaderConfig::from_env()
        .map_err(HermesError::from)
        .context("config stage failed")?;
    cli.apply(&mut config).context("config stage failed")?;

    info!(
        "Workers: {}, output: {}",
        config.workers,
        config.output_dir.display()
    );

    let source = Arc::new(ReqwestSource::new().context("failed to build HTTP client")?);
    let extra_paths = discover_extra_paths(config.ffmpeg_path.as_deref(), &config.ffmpeg_bin);
    let ytdlp = || {
        YtDlpResolver::new(
            ToolRunner::new(config.ytdlp_bin.clone(), extra_paths.clone()),
            config.ytdlp_format.clone(),
        )
    };
    let ffmpeg = || {
        FfmpegTranscoder::new(
            ToolRunner::new(config.ffmpeg_bin.clone(), extra_paths.clone()),
            config.output_ext.clone(),
        )
    };

    match (cli.direct, cli.no_transcode) {
        (false, false) => execute(source, ytdlp(), ffmpeg(), config.clone(), &cli).await,
        (false, true) => execute(source, ytdlp(), NoopTranscoder, config.clone(), &cli).await,
        (true, false) => execute(source, DirectResolver, ffmpeg(), config.clone(), &cli).await,
        (true, true) => execute(source, DirectResolver, NoopTranscoder, config.clone(), &cli).await,
    }
}

async fn execute<R, T>(
    source: Arc<ReqwestSource>,
    resolver: R,
    transcoder: T,
    config: DownloaderConfig,
    cli: &Cli,
) -> anyhow::Result<()>
where
    R: Resolver,
    T: Transcoder,
{
    let downloader = Downloader::new(source, resolver, transcoder, config);
    let reporter = ProgressReporter::spawn(downloader.tracker(), Duration::from_millis(500));
    let outcome = downloader.run(&cli.source).await;
    reporter.finish().await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if let HermesError::Fetch(failure) = &e {
                for f in &failure.failures {
                    error!("  {}", f);
                }
            }
            let stage = e.stage();
            return Err(anyhow::Error::new(e).context(format!("{} stage failed", stage)));
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Saved {} ({}, {} segments, {:.1}s)",
            result.file_path,
            HumanBytes(result.file_size),
            result.segments,
            result.elapsed_ms as f64 / 1000.0
        );
    }
    Ok(())
}
