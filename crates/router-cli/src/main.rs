use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use router_config::Config;
use router_proxy::{
    wait_for_shutdown_signal, AccessLogger, Dispatcher, Lifecycle, ShutdownSignal, Varz,
};
use router_registry::{RedisStore, Registry, StoreClient};
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "router", about = "Layer-7 HTTP reverse proxy")]
struct Args {
    /// Path to a YAML configuration file. Compiled-in defaults apply to
    /// anything the file omits, or if no file is given at all.
    #[arg(short = 'c', long = "config")]
    config: Option<std::path::PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("failed to load configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.go_max_procs > 0 {
        builder.worker_threads(config.go_max_procs as usize);
    }
    let runtime = match builder.build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "router exited with error");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default_processed()?),
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = if config.logging.file.is_empty() {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)
        {
            Ok(file) => BoxMakeWriter::new(move || file.try_clone().expect("clone log file handle")),
            Err(err) => {
                eprintln!(
                    "could not open log file {:?} ({err}), logging to stdout instead",
                    config.logging.file
                );
                BoxMakeWriter::new(std::io::stdout)
            }
        }
    };

    if !config.logging.syslog.is_empty() {
        eprintln!("note: syslog sink {:?} is not supported on this platform, ignoring", config.logging.syslog);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .json()
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let started_at = Instant::now();

    let store: Arc<dyn StoreClient> = Arc::new(RedisStore::connect(&config.redis_server).await?);
    let registry = Arc::new(Registry::new());
    let prune_interval = config.reload_uri_interval() / 5;

    if let Err(err) = registry
        .reload(store.as_ref(), prune_interval, unix_ms_now())
        .await
    {
        error!(%err, "initial route fetch failed, starting with an empty table");
    } else {
        info!("registry.register.complete");
    }

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let reload_task = tokio::spawn(router_registry::run_reload_cycle(
        registry.clone(),
        store.clone(),
        config.reload_uri_interval(),
        prune_interval,
        cancel_rx,
        unix_ms_now,
    ));

    let varz = Arc::new(Varz::with_index(config.index));
    let (access_log, access_log_task) = if config.access_log.is_empty() {
        (AccessLogger::disabled(), None)
    } else {
        let (logger, task) = AccessLogger::spawn_to_file(config.access_log.clone());
        (logger, Some(task))
    };

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        varz.clone(),
        access_log,
        config.trace_key.clone(),
        config.ip.clone(),
        config.endpoint_timeout(),
    ));

    let mut lifecycle = Lifecycle::new(dispatcher);
    let mut err_rx = lifecycle.run(config.port).await?;
    info!(port = config.port, "router.started");

    if config.status.port != 0 {
        let status_addr: SocketAddr = format!("{}:{}", config.ip, config.status.port).parse()?;
        lifecycle
            .start_diagnostics(
                status_addr,
                registry.clone(),
                varz.clone(),
                config.status.user.clone(),
                config.status.pass.clone(),
            )
            .await?;
        info!(%status_addr, "diagnostics.started");
    }

    tokio::select! {
        Some(err) = err_rx.recv() => {
            error!(%err, "listener terminated");
        }
        signal = wait_for_shutdown_signal() => {
            router_proxy::ignore_further_signals().await;
            match signal {
                ShutdownSignal::DrainThenStop => {
                    info!(timeout = ?config.drain_timeout(), "router.draining");
                    if let Err(err) = lifecycle.drain(config.drain_timeout()).await {
                        error!(%err, "drain did not complete in time");
                    }
                }
                ShutdownSignal::Stop => {}
            }
            let stopping_at = Instant::now();
            info!("router.stopping");
            lifecycle.stop().await;
            info!(took = ?stopping_at.elapsed(), "router.stopped");
        }
    }

    let _ = cancel_tx.send(true);
    reload_task.abort();

    // Drop the last access-log sender so the writer task's receive loop
    // ends, then wait for it to flush.
    drop(lifecycle);
    if let Some(task) = access_log_task {
        let _ = task.await;
    }

    info!(uptime = ?started_at.elapsed(), "router.exiting");
    Ok(())
}

fn unix_ms_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
