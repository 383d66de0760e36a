use {
  chainwatch::{
    config::WatcherConfig,
    events::{Event, Topic},
    rpc_source::{JsonRpcSource, TokioScheduler},
    watcher::Watcher,
  },
  clap::Parser,
  std::{path::PathBuf, sync::Arc},
  tracing::{info, warn, Level},
  tracing_subscriber::{filter::filter_fn, prelude::*, util::SubscriberInitExt},
};

#[derive(Debug, Parser)]
#[clap(version, about)]
struct CliOpts {
  #[clap(long, help = "JSON-RPC endpoint of the chain to watch")]
  rpc: String,

  #[clap(long, parse(from_os_str), help = "path to a JSON watcher config file")]
  config: Option<PathBuf>,

  #[clap(
    short,
    long,
    parse(from_occurrences),
    help = "use verbose output (-vv very verbose output)"
  )]
  verbose: u64,
}

impl CliOpts {
  fn watcher_config(&self) -> anyhow::Result<WatcherConfig> {
    match &self.config {
      Some(path) => {
        let json = std::fs::read_to_string(path)?;
        Ok(WatcherConfig::from_json(&json)?)
      }
      None => Ok(WatcherConfig::default()),
    }
  }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
  let opts = CliOpts::parse();

  let loglevel = match opts.verbose {
    1 => Level::DEBUG,
    2 => Level::TRACE,
    _ => Level::INFO,
  };
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_filter(filter_fn(move |metadata| {
      metadata.level() <= &loglevel
    })))
    .init();

  info!("Starting chainwatch");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("RPC endpoint: {}", opts.rpc);

  let config = opts.watcher_config()?;
  let source = Arc::new(JsonRpcSource::new(opts.rpc.clone()));
  let scheduler = Arc::new(TokioScheduler);
  let watcher = Watcher::new(source, scheduler, config)?;

  watcher.on(Topic::Add, |event| {
    if let Event::Add(block) = event {
      info!("add #{} {}", block.number, block.hash);
    }
  });
  watcher.on(Topic::Confirm, |event| {
    if let Event::Confirm(block) = event {
      info!("confirm #{} {}", block.number, block.hash);
    }
  });
  watcher.on(Topic::Rollback, |event| {
    if let Event::Rollback(block) = event {
      warn!("rollback #{} {}", block.number, block.hash);
    }
  });
  watcher.on(Topic::Error, |event| {
    if let Event::Error(message) = event {
      warn!("error: {message}");
    }
  });
  watcher.once(Topic::Ready, |_| info!("ready"));

  watcher.start();
  watcher.run().await;
  Ok(())
}
