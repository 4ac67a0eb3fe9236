use clap::{Args, Parser, Subcommand};
use ohmserve::config::{ConfigOverrides, ServerConfig};
use ohmserve::engine::NetlistEngineFactory;
use ohmserve::error::{OhmserveError, Result};
use ohmserve::output;
use ohmserve::rpc::{self, AppState};
use ohmserve::stream::{RunController, StreamLimits};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Circuit simulation with incrementally streamed results
#[derive(Parser)]
#[command(name = "ohmserve", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Simulate a netlist locally and print results as CSV
    Run(RunArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory uploaded files are staged under
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Per-channel limit on undelivered samples
    #[arg(long)]
    max_buffered_samples: Option<usize>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_filter: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// SPICE netlist file to simulate
    netlist: PathBuf,

    /// Output variable to record, e.g. V(2) or I(V1); repeatable
    #[arg(short = 'v', long = "vector")]
    vectors: Vec<String>,

    /// Delay between polls
    #[arg(long, default_value_t = 20)]
    poll_interval_ms: u64,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve(args) => serve(args),
        Command::Run(args) => run_local(args),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig::load(
        args.config.as_deref(),
        ConfigOverrides {
            listen: args.listen,
            work_dir: args.work_dir,
            max_buffered_samples: args.max_buffered_samples,
            log_filter: args.log_filter,
        },
    )?;
    init_tracing(&config.log_filter);

    std::fs::create_dir_all(&config.work_dir)?;
    let controller = RunController::new(Box::new(NetlistEngineFactory), config.stream_limits());
    let state = AppState::new(controller, config.work_dir.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(config.listen).await?;
        tracing::info!(
            listen = %config.listen,
            work_dir = %config.work_dir.display(),
            max_buffered_samples = ?config.max_buffered_samples,
            "ohmserve listening"
        );
        axum::serve(listener, rpc::router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok::<(), OhmserveError>(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn run_local(args: RunArgs) -> Result<()> {
    init_tracing(&ServerConfig::default().log_filter);

    let controller = RunController::new(Box::new(NetlistEngineFactory), StreamLimits::default());
    let mut cursor = controller.start(&args.netlist, &args.vectors)?;
    let interval = Duration::from_millis(args.poll_interval_ms);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut need_header = true;
    loop {
        let batch = cursor.poll();
        if output::write_batch_csv(&batch, &mut out, need_header)? {
            need_header = false;
        }
        out.flush()?;
        if !batch.more {
            break;
        }
        std::thread::sleep(interval);
    }

    if !cursor.job().wait() {
        return Err(OhmserveError::Analysis("simulation worker panicked".into()));
    }
    tracing::info!(samples = cursor.delivered(), "run finished");
    Ok(())
}
