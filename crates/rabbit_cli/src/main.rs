/* 📖 # What does the stackrabbit binary do?

It wires the pieces together and then gets out of the way: start tracing, start the
worker pool, wrap the engine executable in a ProcessEngine, and serve the analysis
endpoints. There is no configuration file and no environment variable is read; the
few knobs that exist are command line flags.

The server has no shutdown command: it serves until the process is terminated by a
signal. If the HTTP acceptor stops on its own, that is a failure and is reported as
one.

Exit codes:
- 1: startup failed (port in use, threads could not be spawned, ...) or the
  acceptor died while serving
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use rabbit_base::RabbitResult;
use rabbit_base::http::HttpServerConfig;
use rabbit_base::server::start_http_server;
use rabbit_base::tracing::{DEFAULT_LOG_FILTER, init_tracing};
use rabbit_engine::{AnalysisService, EngineHandle, PoolConfig, ProcessEngine, WorkerPool};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "stackrabbit",
    version,
    about = "Serve move analyses for a falling-block puzzle engine over HTTP"
)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// TCP port to listen on
    #[arg(short, long, default_value_t = 4500)]
    port: u16,
    /// Number of analyses run in parallel (defaults to the hardware concurrency)
    #[arg(short, long, value_name = "N", default_value_t = PoolConfig::default_workers())]
    workers: usize,
    /// Reject requests with 503 once this many analyses are waiting
    #[arg(long, value_name = "N")]
    queue_capacity: Option<usize>,
    /// Engine executable, called once per analysis
    #[arg(short, long, value_name = "PATH")]
    engine: PathBuf,
    /// Extra argument passed to the engine before the operation tag (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    engine_args: Vec<String>,
    /// Log filter directives, e.g. `debug` or `rabbit_engine=debug,info`
    #[arg(long, value_name = "FILTER", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
}

impl Args {
    fn pool_config(&self) -> PoolConfig {
        let config = PoolConfig::new(self.workers);
        match self.queue_capacity {
            Some(capacity) => config.with_queue_capacity(capacity),
            None => config,
        }
    }

    fn server_config(&self) -> HttpServerConfig {
        HttpServerConfig::new(self.host.clone()).with_port(self.port)
    }
}

fn run(args: Args) -> RabbitResult<()> {
    let pool = Arc::new(WorkerPool::new(args.pool_config())?);
    let engine = ProcessEngine::new(&args.engine).with_args(args.engine_args.iter().cloned());
    info!(engine = %engine.program().display(), "using engine executable");

    let service = AnalysisService::new(pool.clone(), EngineHandle::new(engine));
    let server = start_http_server(Arc::new(service), &args.server_config())?;
    info!(address = %server.local_addr(), workers = pool.worker_count(), "stackrabbit ready");

    let served = server.join();
    pool.shutdown();
    served?;
    info!("stackrabbit stopped");
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_tracing(&args.log_filter) {
        eprintln!("Error: Failed to initialize logging: {}", e);
        process::exit(1);
    }
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
