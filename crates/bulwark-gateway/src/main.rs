//! `bulwark` - admission-control gateway.

use std::path::PathBuf;

use anyhow::Context;
use bulwark_config::{BulwarkConfig, ConfigLoader};
use bulwark_gateway::GatewayServer;
use tracing::{error, info};

const DEFAULT_CONFIG_FILE: &str = "bulwark.toml";
const ENV_PREFIX: &str = "BULWARK";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let Some(path) = args.next() else {
                        eprintln!("--config requires a path");
                        std::process::exit(1);
                    };
                    config = Some(PathBuf::from(path));
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("bulwark {}", bulwark_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Bulwark - admission-control gateway

USAGE:
    bulwark [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

Without --config, ./bulwark.toml is loaded if it exists. A .env file in the
working directory is read before the environment.

ENVIRONMENT VARIABLES:
    BULWARK__SERVER__HTTP_ADDR                  Listen address (default: 0.0.0.0:8000)
    BULWARK__UPSTREAM__URL                      Upstream base URL
    BULWARK__MIDDLEWARE__RATE_LIMIT             Enable the rate limiter (default: false)
    BULWARK__LIMITS__MAX_REQUESTS_PER_MINUTE    Requests per minute (default: 5)
    BULWARK__LIMITS__MAX_TOKENS_PER_MINUTE      Tokens per minute (default: 5)
    BULWARK__LIMITS__MAX_REQUESTS_PER_DAY       Requests per day (default: 100)
    BULWARK__LIMITS__BLACKLIST                  Comma-separated blocked IPs
    BULWARK__ADMIN__TOKEN                       Bearer token for PUT /_bulwark/limits (unset: updates refused)
    BULWARK__LOGGING__LEVEL                     Log filter (default: info)

EXAMPLES:
    bulwark --config /etc/bulwark/bulwark.toml
    BULWARK__UPSTREAM__URL=http://localhost:3000 bulwark
"
    );
}

fn load_config(args: &Args) -> anyhow::Result<BulwarkConfig> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::new()
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ConfigLoader::new()
            .with_optional_file(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("failed to load {DEFAULT_CONFIG_FILE}"))?,
    };

    loader
        .with_dotenv()
        .context("failed to read .env")?
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("invalid configuration")
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bulwark: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = bulwark_telemetry::init_logging(&config.logging) {
        eprintln!("bulwark: {e}");
        std::process::exit(1);
    }

    info!(
        version = bulwark_gateway::VERSION,
        addr = %config.server.http_addr,
        upstream = %config.upstream.url,
        "starting Bulwark"
    );

    let server = match GatewayServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
