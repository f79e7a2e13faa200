use std::path::PathBuf;
use std::process::ExitCode;

use buzz_ingest::analytics::Trends;
use buzz_ingest::config::Config;
use buzz_ingest::ingestion::ExitSignal;
use buzz_ingest::prelude::BatchReceiver;
use buzz_ingest::sinks::Sink;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// How many entries of each trend get logged.
const TREND_SIZE: usize = 5;

#[derive(Debug, Parser)]
#[command(version, about = "Tails a stream of messages into a storage sink")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "BUZZ_CONFIG")]
    config: Option<PathBuf>,
    /// File to tail, overrides the configuration
    #[arg(long, env = "BUZZ_SOURCE_PATH")]
    source_path: Option<PathBuf>,
    /// Sink to persist into, like sqlite:data/buzz.sqlite or document:data/buzz.jsonl
    #[arg(long, env = "BUZZ_SINK_URI")]
    sink_uri: Option<String>,
    #[arg(long, env = "BUZZ_POLL_INTERVAL_SECONDS")]
    poll_interval_seconds: Option<u64>,
    #[arg(long)]
    start_cursor: Option<u64>,
    /// Keep the records already in the sink
    #[arg(long)]
    no_reset: bool,
}

impl Args {
    fn apply(self, mut config: Config) -> Config {
        if let Some(path) = self.source_path {
            config = config.with_source_path(path);
        }
        if let Some(uri) = self.sink_uri {
            config = config.with_sink_uri(uri);
        }
        if let Some(value) = self.poll_interval_seconds {
            config = config.with_poll_interval_seconds(value);
        }
        if let Some(value) = self.start_cursor {
            config = config.with_start_cursor(value);
        }
        if self.no_reset {
            config = config.with_reset_sink(false);
        }
        config
    }
}

fn head(frequencies: &buzz_ingest::analytics::Frequencies) -> Vec<(&str, usize)> {
    frequencies
        .iter()
        .take(TREND_SIZE)
        .map(|(key, count)| (key.as_str(), *count))
        .collect()
}

async fn display(sink: Sink, mut receiver: BatchReceiver) {
    tracing::info!("starting");
    while let Some(batch) = receiver.recv().await {
        match Trends::collect(&sink).await {
            Ok(trends) => tracing::info!(
                batch = batch.len(),
                keywords = ?head(&trends.keywords),
                categories = ?head(&trends.categories),
                authors = ?head(&trends.authors),
                "trends updated"
            ),
            Err(err) => tracing::error!("unable to compute trends: {err:?}"),
        }
    }
    tracing::info!("stopping");
}

fn exit(signal: ExitSignal) -> ExitCode {
    ExitCode::from(signal.code())
}

#[tokio::main]
async fn main() -> ExitCode {
    buzz_ingest::init_tracing();

    let args = Args::parse();
    let config = match args.config {
        Some(ref path) => match Config::from_path(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(path = %path.display(), "unable to read configuration: {err:?}");
                return exit(ExitSignal::Fatal);
            }
        },
        None => Config::default(),
    };
    let pipeline = match args.apply(config).build() {
        Ok(pipeline) => pipeline,
        Err(err) => {
            tracing::error!("invalid configuration: {err}");
            return exit(ExitSignal::Fatal);
        }
    };

    let token = CancellationToken::new();
    let (sender, receiver) = buzz_ingest::prelude::create_channel(16);
    let span = tracing::info_span!("component", name = "display", kind = "analytics");
    let trends = tokio::spawn(display(pipeline.sink().clone(), receiver).instrument(span));

    let ingestion = match pipeline.prepare(&token, Some(sender)).await {
        Ok(ingestion) => ingestion,
        Err(err) => {
            tracing::error!("unable to start ingestion: {err:?}");
            token.cancel();
            return exit(err.signal());
        }
    };
    let handle = ingestion.spawn(token.clone());

    let interrupt = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    tracing::error!("unable to listen for interrupt: {err:?}");
                    return;
                }
                tracing::info!("interrupt received, stopping after the current iteration");
                interrupt.cancel();
            }
            _ = interrupt.cancelled() => {}
        }
    });

    let result = handle.await;
    token.cancel();
    if let Err(err) = trends.await {
        tracing::error!("display task failed: {err:?}");
    }

    match result {
        Ok(Ok(position)) => {
            tracing::info!(%position, "ingestion stopped");
            exit(ExitSignal::Interrupted)
        }
        Ok(Err(err)) => {
            tracing::error!("ingestion failed: {err:?}");
            exit(err.signal())
        }
        Err(err) => {
            tracing::error!("ingestion task failed: {err:?}");
            exit(ExitSignal::Fatal)
        }
    }
}
