//! Packet-capture extraction via the external editcap/tshark tools.
//!
//! `get_pcap` is fire-and-forget: the pipeline runs on a blocking worker
//! and pushes chunked results to every client through the registry, with
//! the terminal chunk flagged `last`. `get_pcap_wire` extracts one
//! packet's raw bytes.

use crate::net::{run_capture, EmuNet};
use crate::registry::ConnectionRegistry;
use crate::socket::Executor;
use futures_util::future::BoxFuture;
use netplay_core::{arg_bool_or_false, arg_str, arg_u64, funcs, obj, PlayResult, RpcMessage, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, error};

/// tshark field list for packet listings (wire bytes appended on demand).
const SHARK_FIELDS: [&str; 7] = [
    "frame.number",
    "frame.time_epoch",
    "ndn.len",
    "ndn.type",
    "ndn.name",
    "ip.src",
    "ip.dst",
];

/// Frames to re-read behind the client's known frame, in case the last
/// packet was fragmented.
const FRAGMENT_LOOKBACK: u64 = 12;

pub struct SharkExecutor {
    net: Arc<dyn EmuNet>,
    registry: Arc<ConnectionRegistry>,
    chunk_size: usize,
    dissector_lua: Option<PathBuf>,
}

impl SharkExecutor {
    pub fn new(
        net: Arc<dyn EmuNet>,
        registry: Arc<ConnectionRegistry>,
        chunk_size: usize,
        dissector_lua: Option<PathBuf>,
    ) -> Self {
        Self {
            net,
            registry,
            chunk_size,
            dissector_lua,
        }
    }

    fn fields_arg(include_wire: bool) -> String {
        let mut arg = String::from("-Tfields");
        for f in SHARK_FIELDS {
            arg.push_str(" -e ");
            arg.push_str(f);
        }
        if include_wire {
            arg.push_str(" -e ndn.bin");
        }
        arg.push_str(" -Y ndn.len");
        arg
    }

    fn lua_arg(&self) -> String {
        match &self.dissector_lua {
            Some(path) => format!("-X lua_script:{}", path.display()),
            None => String::new(),
        }
    }

    /// Run the listing pipeline and push chunks until the output is
    /// exhausted. Blocking; runs on a worker thread.
    fn send_pcap_chunks(&self, node_id: &str, known_frame: u64, include_wire: bool) -> PlayResult<()> {
        // Cut away what the client already knows instead of re-reading the
        // whole capture, minus the fragmentation look-back.
        let start_frame = known_frame.saturating_sub(FRAGMENT_LOOKBACK).max(1);
        let file = self.net.pcap_path(node_id);

        let pipeline = format!(
            "editcap -r {} /dev/stdout {}-0 | tshark {} -r /dev/stdin {}",
            file.display(),
            start_frame,
            Self::fields_arg(include_wire),
            self.lua_arg(),
        );

        let mut cmd = self.net.command(node_id, "bash", &["-c", &pipeline])?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn()?;
        let pid = child.id();
        self.net.track_child(node_id, pid);

        let ip_map = self.net.ip_map();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| netplay_core::PlayError::Other("capture pipeline has no stdout".into()))?;
        let mut packets: Vec<Value> = Vec::new();

        for line in BufReader::new(stdout).lines() {
            let line = line?;
            if let Some(packet) = parse_packet_line(&line, start_frame, include_wire, &ip_map) {
                packets.push(packet);
            }
            if packets.len() >= self.chunk_size {
                self.push_chunk(node_id, std::mem::take(&mut packets), false);
            }
        }

        self.net.untrack_child(node_id, pid);
        let _ = child.wait();

        // The terminal chunk is flagged, even when empty.
        self.push_chunk(node_id, packets, true);
        Ok(())
    }

    fn push_chunk(&self, node_id: &str, packets: Vec<Value>, last: bool) {
        let mut fields = vec![
            ("id", Value::Text(node_id.to_string())),
            ("packets", Value::Array(packets)),
        ];
        if last {
            fields.push(("last", Value::Bool(true)));
        }
        self.registry
            .broadcast_msg(&RpcMessage::push(funcs::GET_PCAP, obj(fields)));
    }

    /// Extract the raw bytes of one packet. Blocking; runs on a worker.
    fn fetch_wire(&self, node_id: &str, frame: u64) -> PlayResult<Value> {
        let file = self.net.pcap_path(node_id);
        let start_frame = frame.saturating_sub(FRAGMENT_LOOKBACK).max(1);
        let local_frame = frame.saturating_sub(start_frame) + 1;

        let pipeline = format!(
            "editcap -r {} /dev/stdout {}-{} | tshark -r - -e ndn.bin -Tfields {} frame.number == {}",
            file.display(),
            start_frame,
            frame,
            self.lua_arg(),
            local_frame,
        );

        let hex_str = run_capture(self.net.as_ref(), node_id, "bash", &["-c", &pipeline])?;
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| netplay_core::PlayError::Other(format!("bad wire hex: {e}")))?;
        Ok(Value::Bytes(bytes))
    }
}

/// Parse one tshark field line into a packet entry, mapping endpoint IPs
/// back to node names. Lines with too few fields are skipped.
fn parse_packet_line(
    line: &str,
    start_frame: u64,
    include_wire: bool,
    ip_map: &HashMap<String, String>,
) -> Option<Value> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 7 {
        return None;
    }

    let resolve = |ip: &str| ip_map.get(ip).cloned().unwrap_or_else(|| ip.to_string());

    let frame_no = parts[0].parse::<u64>().ok()? + start_frame - 1;
    let timestamp = parts[1].parse::<f64>().ok()? * 1000.0;
    let length = parts[2].parse::<u64>().ok()?;

    let wire = if include_wire && parts.len() >= 8 {
        Value::Bytes(hex::decode(parts[7]).ok()?)
    } else {
        Value::Integer(0.into())
    };

    Some(Value::Array(vec![
        Value::Integer(frame_no.into()),
        Value::Float(timestamp),
        Value::Integer(length.into()),
        Value::Text(parts[3].to_string()),
        Value::Text(parts[4].to_string()),
        Value::Text(resolve(parts[5])),
        Value::Text(resolve(parts[6])),
        wire,
    ]))
}

impl Executor for SharkExecutor {
    fn exposes(&self, fun: &str) -> bool {
        matches!(fun, funcs::GET_PCAP | funcs::GET_PCAP_WIRE)
    }

    fn call(
        self: Arc<Self>,
        fun: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, PlayResult<Option<Value>>> {
        let fun = fun.to_string();
        Box::pin(async move {
            match fun.as_str() {
                funcs::GET_PCAP => {
                    let node_id = arg_str(&args, 0)?.to_string();
                    let known_frame = arg_u64(&args, 1)?;
                    let include_wire = arg_bool_or_false(&args, 2);
                    if !self.net.is_host(&node_id) {
                        return Ok(None);
                    }

                    // Fire and forget: chunks arrive as pushes.
                    let this = self.clone();
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = this.send_pcap_chunks(&node_id, known_frame, include_wire)
                        {
                            error!(node = %node_id, error = %e, "pcap extraction failed");
                        } else {
                            debug!(node = %node_id, "pcap extraction finished");
                        }
                    });
                    Ok(None)
                }
                funcs::GET_PCAP_WIRE => {
                    let node_id = arg_str(&args, 0)?.to_string();
                    let frame = arg_u64(&args, 1)?;
                    if !self.net.is_host(&node_id) {
                        return Ok(None);
                    }

                    let this = self.clone();
                    let wire = tokio::task::spawn_blocking(move || this.fetch_wire(&node_id, frame))
                        .await
                        .map_err(|e| netplay_core::PlayError::Other(format!("join error: {e}")))??;
                    Ok(Some(wire))
                }
                other => Err(netplay_core::PlayError::UnknownFunction(other.to_string())),
            }
        })
    }
}
