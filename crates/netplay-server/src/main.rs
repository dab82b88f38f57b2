//! netplay-server: control-plane server for the netplay emulation GUI.
//!
//! Serves the CBOR RPC protocol over WebSocket, multiplexes pty sessions
//! onto one polling loop, and drives the network model behind the scenes.

mod config;
mod console;
mod exec;
mod logsink;
mod monitor;
mod net;
mod registry;
mod session;
mod socket;

use clap::Parser;
use config::ServerConfig;
use exec::{SharkExecutor, StateExecutor, TermExecutor, TopoExecutor};
use logsink::UiLogSink;
use monitor::LogMonitor;
use net::{EmuNet, LocalNet};
use netplay_core::token;
use registry::ConnectionRegistry;
use session::PtyManager;
use socket::PlaySocket;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// netplay-server — network-emulation GUI control plane
#[derive(Parser, Debug)]
#[command(name = "netplay-server", version, about = "netplay control-plane server")]
struct Cli {
    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.netplay/config.toml")]
    config: String,

    /// Do not start the embedded console session
    #[arg(long)]
    no_cli: bool,

    /// Also start the embedded REPL session
    #[arg(long)]
    repl: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Two log destinations: the operator's terminal, and the GUI console
    // session once it exists.
    let sink = UiLogSink::new();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(sink.clone())
                .with_ansi(false)
                .with_target(false)
                .without_time(),
        )
        .init();

    let config_path = std::path::PathBuf::from(&cli.config);
    let cfg = match ServerConfig::load(Some(&config_path), cli.host.as_deref(), cli.port) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        "starting netplay-server"
    );

    let auth_token = match token::load_or_create(&cfg.token_file, cfg.token_ttl) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to set up auth token");
            std::process::exit(1);
        }
    };

    let net: Arc<dyn EmuNet> = match LocalNet::from_topology(
        cfg.work_dir.join("hosts"),
        cfg.pcap_dir.clone(),
        &cfg.topology,
    ) {
        Ok(net) => Arc::new(net),
        Err(e) => {
            error!(error = %e, "failed to build network");
            std::process::exit(1);
        }
    };
    info!(hosts = net.hosts().len(), "network ready");

    let registry = Arc::new(ConnectionRegistry::new());
    let manager = PtyManager::new(registry.clone(), cfg.poll_tick, cfg.read_chunk);
    manager.start();

    let play_socket = PlaySocket::new(registry.clone(), auth_token);
    let term = Arc::new(TermExecutor::new(
        net.clone(),
        manager.clone(),
        registry.clone(),
        sink.clone(),
        cfg.ring_capacity,
    ));
    play_socket.add_executor(Arc::new(TopoExecutor::new(net.clone())));
    play_socket.add_executor(term.clone());
    play_socket.add_executor(Arc::new(StateExecutor::new(net.clone())));
    play_socket.add_executor(Arc::new(SharkExecutor::new(
        net.clone(),
        registry.clone(),
        cfg.pcap_chunk_size,
        cfg.dissector_lua.clone(),
    )));

    let monitor = cfg.monitor.as_ref().map(|monitor_cfg| {
        let monitor = LogMonitor::new(
            net.hosts(),
            &monitor_cfg.log_file,
            std::time::Duration::from_millis(monitor_cfg.interval_ms),
            &monitor_cfg.filter,
        );
        monitor.start(net.clone(), registry.clone());
        monitor
    });

    info!(
        "open the GUI at {}",
        play_socket.gui_url(&cfg.gui_url, &cfg.public_host, cfg.port)
    );

    let addr: SocketAddr = match format!("{}:{}", cfg.host, cfg.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid listen address");
            std::process::exit(1);
        }
    };
    let server = tokio::spawn(play_socket.clone().run(addr));

    if cli.repl {
        let repl_term = term.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = repl_term.start_repl() {
                error!(error = %e, "repl failed");
            }
        });
    }

    if cli.no_cli {
        tokio::select! {
            result = server => {
                if let Ok(Err(e)) = result {
                    error!(error = %e, "server error");
                    std::process::exit(1);
                }
            }
            _ = shutdown_signal() => {
                info!("received shutdown signal");
            }
        }
    } else {
        let cli_term = term.clone();
        let console = tokio::task::spawn_blocking(move || cli_term.start_cli());
        tokio::select! {
            result = server => {
                if let Ok(Err(e)) = result {
                    error!(error = %e, "server error");
                    std::process::exit(1);
                }
            }
            result = console => {
                if let Ok(Err(e)) = result {
                    error!(error = %e, "console failed");
                }
                info!("console exited");
            }
            _ = shutdown_signal() => {
                info!("received shutdown signal");
            }
        }
    }

    if let Some(monitor) = &monitor {
        monitor.stop();
    }
    info!("netplay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
