//! The network-model collaborator interface.
//!
//! The emulation proper (namespaces, interfaces, traffic shaping) lives
//! outside this crate; executors only need the operations below. `LocalNet`
//! is the in-repo implementation backed by local subprocesses.

mod local;

pub use local::LocalNet;

use netplay_core::PlayResult;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// What kind of entity a node id resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Host,
    Switch,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Host => "Host",
            NodeKind::Switch => "Switch",
        }
    }
}

/// Shaping options attached to a link.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkOpts {
    /// One-way latency in milliseconds.
    pub latency: Option<f64>,
    /// Loss percentage.
    pub loss: Option<f64>,
}

/// One link in the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    /// Stable identifier of the link inside the emulation.
    pub link_id: String,
    pub from: String,
    pub to: String,
    pub opts: LinkOpts,
}

/// Snapshot of the current topology.
#[derive(Debug, Clone, Default)]
pub struct TopoSnapshot {
    /// (id, kind) per node.
    pub nodes: Vec<(String, NodeKind)>,
    pub links: Vec<LinkInfo>,
}

/// Interface to the emulated network.
pub trait EmuNet: Send + Sync {
    fn node_kind(&self, id: &str) -> Option<NodeKind>;

    fn hosts(&self) -> Vec<String>;

    fn snapshot(&self) -> TopoSnapshot;

    fn add_host(&self, label: &str) -> PlayResult<()>;

    fn del_node(&self, id: &str) -> PlayResult<()>;

    /// Add a link between two nodes; returns the generated link id.
    fn add_link(&self, a: &str, b: &str, opts: LinkOpts) -> PlayResult<String>;

    /// Remove a link by id; returns whether it existed.
    fn del_link(&self, a: &str, b: &str, link_id: &str) -> bool;

    /// Reconfigure a link; returns whether it existed.
    fn upd_link(&self, a: &str, b: &str, link_id: &str, opts: LinkOpts) -> bool;

    /// Prepare a command to run on a host (working directory and identity
    /// environment set; stdio left to the caller).
    fn command(&self, host: &str, program: &str, args: &[&str]) -> PlayResult<Command>;

    /// Record a child spawned on a host so it can be interrupted.
    fn track_child(&self, host: &str, pid: u32);

    fn untrack_child(&self, host: &str, pid: u32);

    /// Deliver SIGINT to every tracked busy child on every host.
    fn interrupt_waiting(&self);

    /// Interface IP → node name, for capture display.
    fn ip_map(&self) -> HashMap<String, String>;

    /// Working directory of a host, if the id resolves to one.
    fn host_home(&self, id: &str) -> Option<PathBuf>;

    /// Path of the host's rolling capture file.
    fn pcap_path(&self, host: &str) -> PathBuf;

    fn is_host(&self, id: &str) -> bool {
        matches!(self.node_kind(id), Some(NodeKind::Host))
    }
}

/// Run a command on a host to completion and capture stdout.
///
/// The child is tracked for the duration so a cli interrupt reaches it.
pub fn run_capture(net: &dyn EmuNet, host: &str, program: &str, args: &[&str]) -> PlayResult<String> {
    let mut cmd = net.command(host, program, args)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let child = cmd.spawn()?;
    let pid = child.id();
    net.track_child(host, pid);
    let output = child.wait_with_output();
    net.untrack_child(host, pid);

    Ok(String::from_utf8_lossy(&output?.stdout).into_owned())
}
