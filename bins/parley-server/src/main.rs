use anyhow::{Context, Result};
use clap::Parser;
use parley_config::ParleyConfig;
use parley_server::{ChatServer, ServerConfig};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley-server")]
#[command(about = "thread-per-connection chat broadcast server")]
struct Args {
    #[arg(short, long, help = "configuration file path (toml format)")]
    config: Option<String>,

    #[arg(short, long, help = "listen port, overrides the config file")]
    port: Option<u16>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match ParleyConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("parley-server: {:#}", anyhow::Error::new(e));
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(config, args.port) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ParleyConfig, port: Option<u16>) -> Result<()> {
    let section = config.server;
    let port = port.unwrap_or(section.port);
    // bare IPv6 hosts need brackets before the port
    let bind_addr = if section.bind_addr.contains(':') {
        format!("[{}]:{port}", section.bind_addr)
    } else {
        format!("{}:{port}", section.bind_addr)
    };
    let server_config = ServerConfig {
        bind_addr,
        welcome_text: section.welcome_text,
        read_poll: Duration::from_millis(section.read_poll_ms),
        write_timeout: Duration::from_millis(section.write_timeout_ms),
        max_line_bytes: section.max_line_bytes,
        ..ServerConfig::default()
    };

    let server = ChatServer::bind(server_config)?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        if shutdown.trigger() {
            tracing::info!("received stop signal, shutting down gracefully...");
        }
    })
    .context("failed to install signal handler")?;

    server.run()?;
    Ok(())
}
