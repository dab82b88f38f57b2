//! Server configuration: TOML file + CLI overrides.

use netplay_core::PlayResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub terminal: TerminalSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub monitor: Option<MonitorSection>,
    #[serde(default)]
    pub topology: TopologySection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hostname advertised in the printed GUI URL.
    #[serde(default = "default_public_host")]
    pub public_host: String,
    #[serde(default = "default_gui_url")]
    pub gui_url: String,
    /// Base directory for per-host working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: default_public_host(),
            gui_url: default_gui_url(),
            work_dir: default_work_dir(),
        }
    }
}

/// `[terminal]` section: multiplex loop and replay-buffer tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    /// Replay buffer capacity per session, in bytes.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Per-iteration read ceiling for one descriptor, in bytes.
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Poll timeout of the multiplex loop, in milliseconds.
    #[serde(default = "default_poll_tick_ms")]
    pub poll_tick_ms: u64,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            read_chunk: default_read_chunk(),
            poll_tick_ms: default_poll_tick_ms(),
        }
    }
}

/// `[capture]` section: pcap extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    /// Packets per pushed chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Directory holding `<host>-interfaces.pcap` files.
    #[serde(default = "default_pcap_dir")]
    pub pcap_dir: String,
    /// Optional dissector script passed to tshark via `-X lua_script:`.
    #[serde(default)]
    pub dissector_lua: Option<String>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pcap_dir: default_pcap_dir(),
            dissector_lua: None,
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_token_file")]
    pub token_file: String,
    #[serde(default = "default_token_ttl")]
    pub ttl_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            ttl_secs: default_token_ttl(),
        }
    }
}

/// `[monitor]` section: per-host log-file match counting (optional).
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    pub log_file: String,
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
    /// Substring a line must contain to be counted; empty matches all.
    #[serde(default)]
    pub filter: String,
}

/// `[topology]` section: the emulated network seeded at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologySection {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub switches: Vec<String>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

/// One seeded link.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSpec {
    pub a: String,
    pub b: String,
    #[serde(default)]
    pub latency: Option<f64>,
    #[serde(default)]
    pub loss: Option<f64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_public_host() -> String {
    "127.0.0.1".to_string()
}
fn default_gui_url() -> String {
    "https://play.ndn.today".to_string()
}
fn default_work_dir() -> String {
    "/tmp/netplay".to_string()
}
fn default_ring_capacity() -> usize {
    16000
}
fn default_read_chunk() -> usize {
    4096
}
fn default_poll_tick_ms() -> u64 {
    250
}
fn default_chunk_size() -> usize {
    512
}
fn default_pcap_dir() -> String {
    ".".to_string()
}
fn default_token_file() -> String {
    "/tmp/netplay-auth".to_string()
}
fn default_token_ttl() -> u64 {
    24 * 60 * 60
}
fn default_monitor_interval_ms() -> u64 {
    500
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_host: String,
    pub gui_url: String,
    pub work_dir: PathBuf,
    pub ring_capacity: usize,
    pub read_chunk: usize,
    pub poll_tick: Duration,
    pub pcap_chunk_size: usize,
    pub pcap_dir: PathBuf,
    pub dissector_lua: Option<PathBuf>,
    pub token_file: PathBuf,
    pub token_ttl: Duration,
    pub monitor: Option<MonitorSection>,
    pub topology: TopologySection,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
    ) -> PlayResult<Self> {
        let file = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    netplay_core::PlayError::Other(format!("config parse error: {e}"))
                })?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let host = cli_host
            .map(|s| s.to_string())
            .unwrap_or(file.server.host);
        let port = cli_port.unwrap_or(file.server.port);

        Ok(Self {
            host,
            port,
            public_host: file.server.public_host,
            gui_url: file.server.gui_url,
            work_dir: expand_tilde_str(&file.server.work_dir),
            ring_capacity: file.terminal.ring_capacity,
            read_chunk: file.terminal.read_chunk,
            poll_tick: Duration::from_millis(file.terminal.poll_tick_ms),
            pcap_chunk_size: file.capture.chunk_size,
            pcap_dir: expand_tilde_str(&file.capture.pcap_dir),
            dissector_lua: file.capture.dissector_lua.as_deref().map(expand_tilde_str),
            token_file: expand_tilde_str(&file.auth.token_file),
            token_ttl: Duration::from_secs(file.auth.ttl_secs),
            monitor: file.monitor,
            topology: file.topology,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
