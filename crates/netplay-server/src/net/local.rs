//! In-memory network model backed by local subprocesses.

use super::{EmuNet, LinkInfo, LinkOpts, NodeKind, TopoSnapshot};
use crate::config::TopologySection;
use netplay_core::{PlayError, PlayResult};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use tracing::{debug, warn};

struct HostState {
    home: PathBuf,
    ip: String,
    /// Pids of commands currently running on this host.
    running: Vec<u32>,
}

#[derive(Default)]
struct NetState {
    hosts: BTreeMap<String, HostState>,
    switches: BTreeSet<String>,
    links: Vec<LinkInfo>,
    link_seq: u64,
    ip_seq: u32,
}

/// Local implementation of [`EmuNet`]: an in-memory topology whose hosts
/// execute commands as ordinary local subprocesses rooted in per-host
/// working directories.
pub struct LocalNet {
    state: Mutex<NetState>,
    work_dir: PathBuf,
    pcap_dir: PathBuf,
}

impl LocalNet {
    pub fn new(work_dir: PathBuf, pcap_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(NetState::default()),
            work_dir,
            pcap_dir,
        }
    }

    /// Build a network seeded from the `[topology]` config section.
    pub fn from_topology(
        work_dir: PathBuf,
        pcap_dir: PathBuf,
        topo: &TopologySection,
    ) -> PlayResult<Self> {
        let net = Self::new(work_dir, pcap_dir);
        for host in &topo.hosts {
            net.add_host(host)?;
        }
        for switch in &topo.switches {
            net.add_switch(switch);
        }
        for link in &topo.links {
            net.add_link(
                &link.a,
                &link.b,
                LinkOpts {
                    latency: link.latency,
                    loss: link.loss,
                },
            )?;
        }
        Ok(net)
    }

    pub fn add_switch(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.switches.insert(id.to_string());
    }
}

impl EmuNet for LocalNet {
    fn node_kind(&self, id: &str) -> Option<NodeKind> {
        let state = self.state.lock().unwrap();
        if state.hosts.contains_key(id) {
            Some(NodeKind::Host)
        } else if state.switches.contains(id) {
            Some(NodeKind::Switch)
        } else {
            None
        }
    }

    fn hosts(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.hosts.keys().cloned().collect()
    }

    fn snapshot(&self) -> TopoSnapshot {
        let state = self.state.lock().unwrap();
        let mut nodes: Vec<(String, NodeKind)> = state
            .hosts
            .keys()
            .map(|id| (id.clone(), NodeKind::Host))
            .collect();
        nodes.extend(
            state
                .switches
                .iter()
                .map(|id| (id.clone(), NodeKind::Switch)),
        );
        TopoSnapshot {
            nodes,
            links: state.links.clone(),
        }
    }

    fn add_host(&self, label: &str) -> PlayResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.hosts.contains_key(label) || state.switches.contains(label) {
            return Err(PlayError::Other(format!("node {label} already exists")));
        }

        let home = self.work_dir.join(label);
        std::fs::create_dir_all(&home)?;
        state.ip_seq += 1;
        let ip = format!("10.0.{}.{}", state.ip_seq / 256, state.ip_seq % 256);
        state.hosts.insert(
            label.to_string(),
            HostState {
                home,
                ip,
                running: Vec::new(),
            },
        );
        debug!(host = label, "host added");
        Ok(())
    }

    fn del_node(&self, id: &str) -> PlayResult<()> {
        let mut state = self.state.lock().unwrap();
        let existed = state.hosts.remove(id).is_some() || state.switches.remove(id);
        if !existed {
            return Err(PlayError::UnknownNode(id.to_string()));
        }
        state.links.retain(|l| l.from != id && l.to != id);
        debug!(node = id, "node removed");
        Ok(())
    }

    fn add_link(&self, a: &str, b: &str, opts: LinkOpts) -> PlayResult<String> {
        let mut state = self.state.lock().unwrap();
        for end in [a, b] {
            if !state.hosts.contains_key(end) && !state.switches.contains(end) {
                return Err(PlayError::UnknownNode(end.to_string()));
            }
        }
        state.link_seq += 1;
        let link_id = format!("{a}<->{b}:{}", state.link_seq);
        state.links.push(LinkInfo {
            link_id: link_id.clone(),
            from: a.to_string(),
            to: b.to_string(),
            opts,
        });
        Ok(link_id)
    }

    fn del_link(&self, a: &str, b: &str, link_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.links.len();
        state.links.retain(|l| {
            !(l.link_id == link_id
                && ((l.from == a && l.to == b) || (l.from == b && l.to == a)))
        });
        state.links.len() != before
    }

    fn upd_link(&self, a: &str, b: &str, link_id: &str, opts: LinkOpts) -> bool {
        let mut state = self.state.lock().unwrap();
        for link in &mut state.links {
            if link.link_id == link_id
                && ((link.from == a && link.to == b) || (link.from == b && link.to == a))
            {
                if opts.latency.is_some() {
                    link.opts.latency = opts.latency;
                }
                if opts.loss.is_some() {
                    link.opts.loss = opts.loss;
                }
                return true;
            }
        }
        false
    }

    fn command(&self, host: &str, program: &str, args: &[&str]) -> PlayResult<Command> {
        let state = self.state.lock().unwrap();
        let entry = state
            .hosts
            .get(host)
            .ok_or_else(|| PlayError::UnknownNode(host.to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&entry.home)
            .env("NETPLAY_NODE", host)
            .env("HOME", &entry.home);
        Ok(cmd)
    }

    fn track_child(&self, host: &str, pid: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.hosts.get_mut(host) {
            entry.running.push(pid);
        }
    }

    fn untrack_child(&self, host: &str, pid: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.hosts.get_mut(host) {
            entry.running.retain(|p| *p != pid);
        }
    }

    fn interrupt_waiting(&self) {
        let pids: Vec<u32> = {
            let state = self.state.lock().unwrap();
            state
                .hosts
                .values()
                .flat_map(|h| h.running.iter().copied())
                .collect()
        };
        for pid in pids {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                warn!(pid, error = %e, "failed to interrupt child");
            }
        }
    }

    fn ip_map(&self) -> HashMap<String, String> {
        let state = self.state.lock().unwrap();
        state
            .hosts
            .iter()
            .map(|(name, h)| (h.ip.clone(), name.clone()))
            .collect()
    }

    fn host_home(&self, id: &str) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        state.hosts.get(id).map(|h| h.home.clone())
    }

    fn pcap_path(&self, host: &str) -> PathBuf {
        self.pcap_dir.join(format!("{host}-interfaces.pcap"))
    }
}
