use anyhow::bail;
use clap::Parser;
use core::time::Duration;

const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_NUM_WORKERS: usize = 4;
const DEFAULT_QUEUE_DEPTH: usize = 64;
const DEFAULT_STREAM_BUFFER_SIZE: usize = 1;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_TOKEN_INTERVAL_MS: u64 = 20;

/// Runtime configuration for the `genserve-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "genserve-server",
    version,
    about = "An HTTP endpoint for blocking and streaming text generation"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:8000" or "/tmp/genserve.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Number of engine worker tasks.
    ///
    /// Each worker runs one generation at a time; requests are distributed
    /// round-robin.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = DEFAULT_NUM_WORKERS)]
    pub num_workers: usize,

    /// Requests that may wait in each worker's queue before new submissions
    /// are rejected with `503`.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Capacity of the hand-off between a streaming session and its HTTP
    /// body.
    ///
    /// With the default of 1 no more than one chunk is produced ahead of what
    /// the client has accepted.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = DEFAULT_STREAM_BUFFER_SIZE)]
    pub stream_buffer_size: usize,

    /// Largest accepted request body, in bytes.
    ///
    /// Environment variable: `MAX_BODY_BYTES`
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Seconds to wait for in-flight sessions to finish on shutdown before
    /// they are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,

    /// Delay between generation steps of the replay engine, in milliseconds.
    ///
    /// Environment variable: `TOKEN_INTERVAL_MS`
    #[arg(long, env = "TOKEN_INTERVAL_MS", default_value_t = DEFAULT_TOKEN_INTERVAL_MS)]
    pub token_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub num_workers: usize,
    pub queue_depth: usize,
    pub stream_buffer_size: usize,
    pub max_body_bytes: usize,
    pub shutdown_timeout: Duration,
    pub token_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            uds: false,
            num_workers: DEFAULT_NUM_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            token_interval: Duration::from_millis(DEFAULT_TOKEN_INTERVAL_MS),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.queue_depth == 0 {
            bail!("QUEUE_DEPTH must be greater than 0");
        }
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }
        if args.max_body_bytes == 0 {
            bail!("MAX_BODY_BYTES must be greater than 0");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            num_workers: args.num_workers,
            queue_depth: args.queue_depth,
            stream_buffer_size: args.stream_buffer_size,
            max_body_bytes: args.max_body_bytes,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            token_interval: Duration::from_millis(args.token_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> CliArgs {
        let mut argv = vec![
            "genserve-server",
            "--server-addr",
            "127.0.0.1:9000",
            "--num-workers",
            "2",
            "--queue-depth",
            "8",
            "--stream-buffer-size",
            "1",
            "--max-body-bytes",
            "4096",
            "--shutdown-timeout",
            "1",
            "--token-interval-ms",
            "0",
        ];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn converts_units() {
        let config = ServerConfig::try_from(parse(&[])).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:9000");
        assert!(!config.uds);
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.token_interval, Duration::ZERO);
    }

    #[test]
    fn rejects_zero_sized_resources() {
        for flag in [
            "--num-workers",
            "--queue-depth",
            "--stream-buffer-size",
            "--max-body-bytes",
        ] {
            let args = parse(&[flag, "0"]);
            let err = ServerConfig::try_from(args).unwrap_err();
            assert!(err.to_string().contains("must be greater than 0"), "{flag}");
        }
    }

    #[test]
    fn uds_flag() {
        let config = ServerConfig::try_from(parse(&["--uds"])).unwrap();
        assert!(config.uds);
    }
}
