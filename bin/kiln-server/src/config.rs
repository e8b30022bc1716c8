//! Server configuration, resolved from CLI flags, an optional TOML config
//! file, and `KILN_*` environment variables, in that precedence order
//! (CLI wins, then the config file, then the environment, then defaults).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Command-line flags understood by `kiln-server`.
///
/// Every field is optional here, independent of whether it has a default —
/// `None` means "not passed on the command line", which lets
/// [`ServerConfig::load`] tell that apart from an explicit value when
/// merging against the config file and environment.
#[derive(Parser, Debug, Default)]
#[command(name = "kiln-server", about = "kiln inference serving core")]
pub struct CliArgs {
    /// Path to the model weights file.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Context window size, in tokens.
    #[arg(long = "context-size")]
    pub context_size: Option<u32>,

    /// Number of model layers to offload to GPU (0 disables offloading).
    #[arg(long = "gpu-layers")]
    pub gpu_layers: Option<i32>,

    /// TCP address to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to bind.
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of worker threads, each owning one inference context.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Admission queue capacity.
    #[arg(long = "queue-capacity")]
    pub queue_capacity: Option<usize>,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Emit log records as newline-delimited JSON.
    #[arg(long = "log-json")]
    pub log_json: bool,

    /// Shorthand for `--log-level debug`.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Path to a TOML config file; values here are overridden by the flags
    /// above but win over the environment and built-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The subset of [`ServerConfig`] a TOML config file may set.
#[derive(Deserialize, Debug, Default)]
struct FileConfig {
    model: Option<PathBuf>,
    library_path: Option<PathBuf>,
    context_size: Option<u32>,
    gpu_layers: Option<i32>,
    host: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    request_timeout_secs: Option<u64>,
    log_level: Option<String>,
    log_json: Option<bool>,
}

/// Fully resolved configuration the rest of the server reads.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub model_path: String,
    /// Path to the native runtime's shared library (`libllama.so` et al.).
    /// No CLI flag by design — this is a deployment detail, not something an
    /// operator tunes per request; set it via the config file or
    /// `KILN_LIBRARY_PATH`.
    pub library_path: PathBuf,
    pub context_size: u32,
    pub gpu_layers: i32,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
    pub log_level: String,
    pub log_json: bool,
    /// Comma-separated list of allowed CORS origins; `None` allows all
    /// origins. No CLI flag by design, same reasoning as `library_path` —
    /// set via `KILN_CORS_ORIGINS` or the config file.
    pub cors_allowed_origins: Option<String>,
    /// Optional bearer token required for `/admin/*` routes. `None` leaves
    /// admin routes unauthenticated — the pluggable auth hook §9(c) expects.
    pub admin_token: Option<String>,
}

impl ServerConfig {
    /// Resolves configuration from `cli`, an optional config file, the
    /// `KILN_*` environment, then built-in defaults, highest precedence
    /// first.
    pub fn load(cli: CliArgs) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let log_level = if cli.verbose {
            "debug".to_owned()
        } else {
            cli.log_level
                .or(file.log_level)
                .or_else(|| std::env::var("KILN_LOG").ok())
                .unwrap_or_else(|| "info".to_owned())
        };

        Ok(Self {
            model_path: cli
                .model
                .map(path_to_string)
                .or(file.model.map(path_to_string))
                .or_else(|| std::env::var("KILN_MODEL").ok())
                .unwrap_or_default(),
            library_path: file
                .library_path
                .or_else(|| std::env::var("KILN_LIBRARY_PATH").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("libllama.so")),
            context_size: cli
                .context_size
                .or(file.context_size)
                .or_else(|| parse_env("KILN_CONTEXT_SIZE"))
                .unwrap_or(4096),
            gpu_layers: cli
                .gpu_layers
                .or(file.gpu_layers)
                .or_else(|| parse_env("KILN_GPU_LAYERS"))
                .unwrap_or(0),
            host: cli
                .host
                .or(file.host)
                .or_else(|| std::env::var("KILN_HOST").ok())
                .unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: cli
                .port
                .or(file.port)
                .or_else(|| parse_env("KILN_PORT"))
                .unwrap_or(8080),
            workers: cli
                .workers
                .or(file.workers)
                .or_else(|| parse_env("KILN_WORKERS"))
                .unwrap_or(1),
            queue_capacity: cli
                .queue_capacity
                .or(file.queue_capacity)
                .or_else(|| parse_env("KILN_QUEUE_CAPACITY"))
                .unwrap_or(64),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs
                    .or_else(|| parse_env("KILN_REQUEST_TIMEOUT_SECS"))
                    .unwrap_or(120),
            ),
            log_level,
            log_json: cli.log_json || file.log_json.unwrap_or(false) || env_bool("KILN_LOG_JSON"),
            cors_allowed_origins: std::env::var("KILN_CORS_ORIGINS").ok(),
            admin_token: std::env::var("KILN_ADMIN_TOKEN").ok(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ServerConfig> for kiln_core::PoolConfig {
    fn from(cfg: &ServerConfig) -> Self {
        kiln_core::PoolConfig {
            library_path: cfg.library_path.clone(),
            model_path: cfg.model_path.clone(),
            context_size: cfg.context_size,
            gpu_layers: cfg.gpu_layers,
            num_workers: cfg.workers.max(1),
            queue_capacity: cfg.queue_capacity,
            request_timeout: cfg.request_timeout,
        }
    }
}

fn path_to_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn load_file_config(path: &PathBuf) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    toml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = ServerConfig::load(CliArgs::default()).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.queue_capacity, 64);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn cli_flags_override_defaults() {
        let cli = CliArgs {
            host: Some("127.0.0.1".to_owned()),
            port: Some(9999),
            workers: Some(4),
            verbose: true,
            ..Default::default()
        };
        let cfg = ServerConfig::load(cli).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn bind_address_combines_host_and_port() {
        let cli = CliArgs {
            host: Some("localhost".to_owned()),
            port: Some(4321),
            ..Default::default()
        };
        let cfg = ServerConfig::load(cli).unwrap();
        assert_eq!(cfg.bind_address(), "localhost:4321");
    }

    #[test]
    fn pool_config_conversion_carries_model_and_sizing_fields() {
        let cli = CliArgs {
            model: Some(PathBuf::from("/models/llama.gguf")),
            context_size: Some(8192),
            workers: Some(2),
            ..Default::default()
        };
        let cfg = ServerConfig::load(cli).unwrap();
        let pool_config: kiln_core::PoolConfig = (&cfg).into();
        assert_eq!(pool_config.model_path, "/models/llama.gguf");
        assert_eq!(pool_config.context_size, 8192);
        assert_eq!(pool_config.num_workers, 2);
    }
}
