use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use infergate_core::{DispatchConfig, SimulatedModel};

/// Runtime configuration for the `infergate-server` binary.
///
/// These settings control admission, concurrency, batching and the simulated
/// model behind the gateway. All values are parsed from CLI arguments or
/// environment variables (a `.env` file is loaded first), with defaults
/// suitable for a single-node deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "infergate-server",
    version,
    about = "An HTTP inference gateway with load shedding and dynamic micro-batching"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Number of pool workers, or of batch processors when batching.
    ///
    /// Also bounds the number of concurrent backend calls in batching mode.
    /// Values below 1 are clamped to 1.
    ///
    /// Environment variable: `WORKERS`
    #[arg(long, env = "WORKERS", default_value_t = 32, allow_negative_numbers = true)]
    pub workers: i64,

    /// Group requests into batches instead of calling the model per request.
    ///
    /// Environment variable: `BATCH`
    #[arg(long, env = "BATCH", default_value_t = false)]
    pub batch: bool,

    /// Largest number of requests sent to the model in one call.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 8)]
    pub batch_size: usize,

    /// Interval, in milliseconds, at which a partial batch is flushed.
    ///
    /// Environment variable: `BATCH_FLUSH_MS`
    #[arg(long, env = "BATCH_FLUSH_MS", default_value_t = 10)]
    pub batch_flush_ms: u64,

    /// Per-request deadline in milliseconds, measured from admission.
    ///
    /// Environment variable: `TIMEOUT_MS`
    #[arg(long, env = "TIMEOUT_MS", default_value_t = 400)]
    pub timeout_ms: u64,

    /// Retry attempts after a failed model call.
    ///
    /// Environment variable: `RETRIES`
    #[arg(long, env = "RETRIES", default_value_t = 0)]
    pub retries: usize,

    /// Capacity of the admission queue. Requests beyond it are shed with
    /// `503 queue_full`.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 10_000)]
    pub queue_capacity: usize,

    /// Seconds to wait for in-flight work to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Lower bound of the simulated model latency, in milliseconds.
    ///
    /// Environment variable: `MODEL_LATENCY_MIN_MS`
    #[arg(long, env = "MODEL_LATENCY_MIN_MS", default_value_t = 70)]
    pub model_latency_min_ms: u64,

    /// Upper bound of the simulated model latency, in milliseconds.
    ///
    /// Environment variable: `MODEL_LATENCY_MAX_MS`
    #[arg(long, env = "MODEL_LATENCY_MAX_MS", default_value_t = 100)]
    pub model_latency_max_ms: u64,

    /// Probability that a simulated model call fails.
    ///
    /// Environment variable: `MODEL_FAILURE_RATE`
    #[arg(long, env = "MODEL_FAILURE_RATE", default_value_t = 0.02)]
    pub model_failure_rate: f64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub dispatch: DispatchConfig,
    pub shutdown_timeout: Duration,
    pub model: SimulatedModel,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }

        if args.batch_flush_ms == 0 {
            bail!("BATCH_FLUSH_MS must be greater than 0");
        }

        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }

        if args.model_latency_min_ms > args.model_latency_max_ms {
            bail!(
                "MODEL_LATENCY_MIN_MS ({}) exceeds MODEL_LATENCY_MAX_MS ({})",
                args.model_latency_min_ms,
                args.model_latency_max_ms
            );
        }

        if !(0.0..=1.0).contains(&args.model_failure_rate) {
            bail!(
                "MODEL_FAILURE_RATE ({}) must be within [0, 1]",
                args.model_failure_rate
            );
        }

        // Non-positive worker counts still run a single worker.
        let workers = usize::try_from(args.workers.max(1)).unwrap_or(usize::MAX);

        Ok(Self {
            server_addr: args.server_addr,
            dispatch: DispatchConfig {
                workers,
                batching: args.batch,
                max_batch_size: args.batch_size,
                flush_interval: Duration::from_millis(args.batch_flush_ms),
                timeout: Duration::from_millis(args.timeout_ms),
                retries: args.retries,
                queue_capacity: args.queue_capacity,
                ..DispatchConfig::default()
            },
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            model: SimulatedModel::new(
                args.model_latency_min_ms..=args.model_latency_max_ms,
                args.model_failure_rate,
            ),
        })
    }
}
