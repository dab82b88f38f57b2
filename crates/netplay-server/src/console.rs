//! Embedded consoles bound to the worker side of a pty.
//!
//! `CliConsole` is the operator command console; `NetRepl` is a read-eval
//! loop for inspecting the network handle interactively. Both are generic
//! over their streams so tests can drive them with in-memory buffers.

use crate::net::{run_capture, EmuNet, NodeKind};
use std::io::{BufRead, Write};
use std::sync::Arc;

/// Line-oriented operator console.
pub struct CliConsole {
    net: Arc<dyn EmuNet>,
}

impl CliConsole {
    pub fn new(net: Arc<dyn EmuNet>) -> Self {
        Self { net }
    }

    /// Run until EOF or `exit`. Blocking; callers give it a dedicated thread.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut out: W) -> std::io::Result<()> {
        writeln!(out, "netplay console — type 'help' for commands")?;
        loop {
            write!(out, "netplay> ")?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let mut parts = line.split_whitespace();
            let Some(cmd) = parts.next() else {
                continue;
            };
            let rest: Vec<&str> = parts.collect();

            match cmd {
                "help" => {
                    writeln!(out, "commands:")?;
                    writeln!(out, "  nodes              list nodes")?;
                    writeln!(out, "  links              list links")?;
                    writeln!(out, "  exec <host> <cmd>  run a command on a host")?;
                    writeln!(out, "  exit               leave the console")?;
                }
                "nodes" => {
                    for (id, kind) in self.net.snapshot().nodes {
                        writeln!(out, "{id} ({})", kind.label())?;
                    }
                }
                "links" => {
                    for link in self.net.snapshot().links {
                        let mut extras = String::new();
                        if let Some(latency) = link.opts.latency {
                            extras.push_str(&format!(" latency={latency}ms"));
                        }
                        if let Some(loss) = link.opts.loss {
                            extras.push_str(&format!(" loss={loss}%"));
                        }
                        writeln!(out, "{} -- {}{extras}", link.from, link.to)?;
                    }
                }
                "exec" => match rest.split_first() {
                    Some((host, cmd)) if !cmd.is_empty() => {
                        if !self.net.is_host(host) {
                            writeln!(out, "unknown host: {host}")?;
                            continue;
                        }
                        match run_capture(self.net.as_ref(), host, cmd[0], &cmd[1..]) {
                            Ok(output) => out.write_all(output.as_bytes())?,
                            Err(e) => writeln!(out, "error: {e}")?,
                        }
                    }
                    _ => writeln!(out, "usage: exec <host> <cmd...>")?,
                },
                "exit" | "quit" => return Ok(()),
                other => writeln!(out, "unknown command: {other}")?,
            }
        }
    }
}

/// Read-eval loop with the network handle pre-bound as `net`.
pub struct NetRepl {
    net: Arc<dyn EmuNet>,
}

impl NetRepl {
    pub fn new(net: Arc<dyn EmuNet>) -> Self {
        Self { net }
    }

    /// Run until EOF or `exit`.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut out: W) -> std::io::Result<()> {
        writeln!(out, "netplay repl — 'net' is bound to the running network")?;
        loop {
            write!(out, ">>> ")?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let expr = line.trim();
            if expr.is_empty() {
                continue;
            }
            if expr == "exit" || expr == "quit" {
                return Ok(());
            }

            match self.eval(expr) {
                Some(text) => writeln!(out, "{text}")?,
                None => writeln!(out, "unknown expression: {expr}")?,
            }
        }
    }

    fn eval(&self, expr: &str) -> Option<String> {
        match expr {
            "net" => {
                let snap = self.net.snapshot();
                Some(format!(
                    "<network: {} nodes, {} links>",
                    snap.nodes.len(),
                    snap.links.len()
                ))
            }
            "net.hosts()" => Some(format!("{:?}", self.net.hosts())),
            "net.links()" => {
                let links: Vec<String> = self
                    .net
                    .snapshot()
                    .links
                    .iter()
                    .map(|l| l.link_id.clone())
                    .collect();
                Some(format!("{links:?}"))
            }
            "help" => Some(
                "expressions: net, net.hosts(), net.links(), net.node(<id>), exit".to_string(),
            ),
            _ => {
                let id = expr
                    .strip_prefix("net.node(")?
                    .strip_suffix(')')?
                    .trim_matches(|c| c == '"' || c == '\'');
                match self.net.node_kind(id) {
                    Some(NodeKind::Host) => Some(format!("<host {id}>")),
                    Some(NodeKind::Switch) => Some(format!("<switch {id}>")),
                    None => Some(format!("no such node: {id}")),
                }
            }
        }
    }
}
