//! Terminal lifecycle: bash terminals on hosts, the embedded console and
//! REPL sessions, input forwarding, and resize.

use crate::console::{CliConsole, NetRepl};
use crate::logsink::UiLogSink;
use crate::net::EmuNet;
use crate::registry::ConnectionRegistry;
use crate::session::{PtyManager, PtySession};
use crate::socket::Executor;
use futures_util::future::BoxFuture;
use netplay_core::{arg_bytes, arg_str, arg_u64, funcs, obj, PlayResult, RpcMessage, Value};
use std::io::BufReader;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Identifier of the embedded console session.
pub const CLI_ID: &str = "cli";
/// Identifier of the embedded REPL session.
pub const REPL_ID: &str = "repl";

/// The interrupt byte a terminal sends for Ctrl-C.
const INTERRUPT: u8 = 0x03;

pub struct TermExecutor {
    net: Arc<dyn EmuNet>,
    manager: Arc<PtyManager>,
    registry: Arc<ConnectionRegistry>,
    sink: UiLogSink,
    ring_capacity: usize,
    /// Suffix source for generated terminal ids; monotonic so ids never
    /// collide while keeping the `<host><digits>` shape clients expect.
    term_seq: AtomicU64,
}

impl TermExecutor {
    pub fn new(
        net: Arc<dyn EmuNet>,
        manager: Arc<PtyManager>,
        registry: Arc<ConnectionRegistry>,
        sink: UiLogSink,
        ring_capacity: usize,
    ) -> Self {
        Self {
            net,
            manager,
            registry,
            sink,
            ring_capacity,
            term_seq: AtomicU64::new(10000),
        }
    }

    /// Start the embedded console session and run it on the calling thread
    /// until EOF. Log output is teed to this session from here on.
    pub fn start_cli(&self) -> PlayResult<()> {
        let session = PtySession::open(CLI_ID, "netplay CLI", self.ring_capacity)?;
        self.manager.register(session.clone());
        self.sink.install(session.clone(), self.registry.clone());

        let reader = std::fs::File::from(session.worker_handle()?);
        let writer = std::fs::File::from(session.worker_handle()?);
        info!("console ready");
        CliConsole::new(self.net.clone()).run(BufReader::new(reader), writer)?;
        Ok(())
    }

    /// Start the embedded REPL session and run it on the calling thread
    /// until its stream closes.
    pub fn start_repl(&self) -> PlayResult<()> {
        let session = PtySession::open(REPL_ID, "netplay REPL", self.ring_capacity)?;
        self.manager.register(session.clone());

        let reader = std::fs::File::from(session.worker_handle()?);
        let writer = std::fs::File::from(session.worker_handle()?);
        NetRepl::new(self.net.clone()).run(BufReader::new(reader), writer)?;
        Ok(())
    }

    /// Open a new bash terminal on a host. Unknown or non-host ids get no
    /// response.
    fn open_term(&self, node_id: &str) -> PlayResult<Option<Value>> {
        if !self.net.is_host(node_id) {
            return Ok(None);
        }

        let suffix = self.term_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{node_id}{suffix}");
        let session = PtySession::open(&id, &format!("bash [{node_id}]"), self.ring_capacity)?;

        let mut cmd = self.net.command(node_id, "bash", &["--noprofile", "-i"])?;
        cmd.env("PS1", format!("\\u@{node_id}:\\w\\$ "))
            .stdin(Stdio::from(session.worker_handle()?))
            .stdout(Stdio::from(session.worker_handle()?))
            .stderr(Stdio::from(session.worker_handle()?));
        let child = cmd.spawn()?;
        debug!(id = %id, pid = child.id(), "shell spawned");

        session.attach_child(child);
        // Snapshot before the multiplex loop can append the first prompt
        // bytes, so the response always carries an empty buffer.
        let response = open_term_response(&session);
        self.manager.register(session);

        Ok(Some(response))
    }

    /// Replay every live session to all clients as `open_term` pushes.
    fn open_all_ptys(&self) {
        for session in self.manager.list() {
            self.registry.broadcast_msg(&RpcMessage::push(
                funcs::OPEN_TERMINAL,
                open_term_response(&session),
            ));
        }
    }

    /// Forward input bytes to a terminal. Ctrl-C addressed to the console
    /// session is consumed and interrupts every busy supervised command
    /// instead.
    fn pty_in(&self, id: &str, data: &[u8]) -> PlayResult<()> {
        let Some(session) = self.manager.get(id) else {
            return Ok(());
        };

        if id == CLI_ID && data == [INTERRUPT] {
            self.net.interrupt_waiting();
            return Ok(());
        }

        session.write_input(data)
    }

    fn pty_resize(&self, id: &str, rows: u16, cols: u16) -> PlayResult<()> {
        let Some(session) = self.manager.get(id) else {
            return Ok(());
        };
        session.resize(rows, cols)
    }
}

/// The `{id, name, buf}` payload of `open_term` responses and pushes.
fn open_term_response(session: &PtySession) -> Value {
    obj([
        ("id", Value::Text(session.id.clone())),
        ("name", Value::Text(session.name.clone())),
        ("buf", Value::Bytes(session.snapshot())),
    ])
}

impl Executor for TermExecutor {
    fn exposes(&self, fun: &str) -> bool {
        matches!(
            fun,
            funcs::OPEN_TERMINAL | funcs::OPEN_ALL_PTYS | funcs::PTY_IN | funcs::PTY_RESIZE
        )
    }

    fn call(
        self: Arc<Self>,
        fun: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, PlayResult<Option<Value>>> {
        let fun = fun.to_string();
        Box::pin(async move {
            match fun.as_str() {
                funcs::OPEN_TERMINAL => {
                    let node_id = arg_str(&args, 0)?;
                    self.open_term(node_id)
                }
                funcs::OPEN_ALL_PTYS => {
                    self.open_all_ptys();
                    Ok(None)
                }
                funcs::PTY_IN => {
                    let id = arg_str(&args, 0)?;
                    let data = arg_bytes(&args, 1)?;
                    self.pty_in(id, data)?;
                    Ok(None)
                }
                funcs::PTY_RESIZE => {
                    let id = arg_str(&args, 0)?;
                    let rows = arg_u64(&args, 1)? as u16;
                    let cols = arg_u64(&args, 2)? as u16;
                    self.pty_resize(id, rows, cols)?;
                    Ok(None)
                }
                other => Err(netplay_core::PlayError::UnknownFunction(other.to_string())),
            }
        })
    }
}
