// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Transfer Agent Service
//!
//! The transfer agent runs on every node hosting servers and moves servers
//! between nodes. It:
//!
//! - Stops and archives a server when asked to send it away
//! - Serves that archive, with its checksum, to the receiving node
//! - Downloads, verifies and unpacks archives for incoming servers
//! - Reports the outcome of both halves to the control plane

use anyhow::{Context, Result};
use dropshot::{ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HttpServerStarter};
use tracing::info;

use transfer_agent::TransferAgentImpl;
use transfer_agent::config::AgentConfig;
use transfer_agent::context::ApiContext;

/// Default bind address for the HTTP server.
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default maximum request body size (bytes).
const DEFAULT_BODY_MAX_BYTES: usize = 10 * 1024 * 1024; // provisioning payloads are small

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version and --help
    let args: Vec<String> = std::env::args().collect();
    #[allow(clippy::never_loop)] // Intentional: early return on first recognized arg
    for arg in &args[1..] {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_version();
                println!("Usage: {} [OPTIONS]", args[0]);
                println!();
                println!("Options:");
                println!("  -h, --help       Display this information");
                println!("  -V, --version    Display the program's version number");
                println!();
                println!("Environment variables:");
                println!(
                    "  BIND_ADDRESS           Server bind address (default: {})",
                    DEFAULT_BIND_ADDRESS
                );
                println!(
                    "  DATA_DIR               Root of server data directories (default: /var/lib/transfer-agent/volumes)"
                );
                println!(
                    "  ARCHIVE_DIR            Transfer archive directory (default: /var/lib/transfer-agent/archives)"
                );
                println!(
                    "  DOWNLOAD_LIMIT         Download limit in MiB/s, 0 for unlimited (default: 0)"
                );
                println!(
                    "  STOP_TIMEOUT_SECS      Seconds to wait for a server to stop (default: 60)"
                );
                println!("  PANEL_URL              Control plane base URL (required)");
                println!("  PANEL_TOKEN            Control plane bearer token (required)");
                println!("  TRANSFER_TOKEN_SECRET  Node-to-node token secret (required)");
                println!(
                    "  RUST_LOG               Log filter (default: transfer_agent=info,dropshot=info)"
                );
                return Ok(());
            }
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "transfer_agent=info,dropshot=info".to_string()),
        ))
        .init();

    print_version();
    transfer_agent::install_crypto_provider();

    // Load configuration
    let config = AgentConfig::from_env().context("Failed to load configuration")?;
    info!("Data directory: {}", config.data_dir.display());
    info!("Archive directory: {}", config.archive_dir.display());
    match config.rate_limit() {
        Some(limit) => info!(bytes_per_sec = limit, "Download limit enabled"),
        None => info!("Download limit disabled"),
    }

    transfer_agent::metrics::register_metrics();

    // Create API context
    let api_context = ApiContext::new(config)
        .await
        .context("Failed to create API context")?;

    // Get API description from the trait implementation
    let api = transfer_agent_api::transfer_agent_api_mod::api_description::<TransferAgentImpl>()
        .map_err(|e| anyhow::anyhow!("Failed to create API description: {}", e))?;

    // Configure the server
    let bind_address = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string())
        .parse()
        .context("Invalid BIND_ADDRESS")?;

    let config_dropshot = ConfigDropshot {
        bind_address,
        default_request_body_max_bytes: DEFAULT_BODY_MAX_BYTES,
        default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
        ..Default::default()
    };

    let config_logging = ConfigLogging::StderrTerminal {
        level: ConfigLoggingLevel::Info,
    };

    let log = config_logging
        .to_logger("transfer-agent")
        .map_err(|error| anyhow::anyhow!("failed to create logger: {}", error))?;

    // Start the server
    let server = HttpServerStarter::new(&config_dropshot, api, api_context, &log)
        .map_err(|error| anyhow::anyhow!("failed to create server: {}", error))?
        .start();

    info!("Transfer agent running on http://{}", bind_address);

    server
        .await
        .map_err(|error| anyhow::anyhow!("server failed: {}", error))
}
