//! Per-host log-file monitoring.
//!
//! Tails one log file per host and pushes the number of new matching lines
//! to all clients every tick as a `monitor_counts` frame.

use crate::net::EmuNet;
use crate::registry::ConnectionRegistry;
use netplay_core::{funcs, RpcMessage, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LogMonitor {
    nodes: Vec<String>,
    log_file: String,
    interval: Duration,
    /// Substring a line must contain to count; empty matches every line.
    filter: String,
    quit: Arc<AtomicBool>,
}

struct Tail {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl Tail {
    /// Count new matching lines since the previous call, opening the file
    /// lazily once it appears.
    fn count_new(&mut self, filter: &str) -> u64 {
        if self.reader.is_none() {
            self.reader = File::open(&self.path).ok().map(BufReader::new);
        }
        let Some(reader) = self.reader.as_mut() else {
            return 0;
        };

        let mut count = 0;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if filter.is_empty() || line.contains(filter) {
                        count += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "log read failed");
                    self.reader = None;
                    break;
                }
            }
        }
        count
    }
}

impl LogMonitor {
    pub fn new(nodes: Vec<String>, log_file: &str, interval: Duration, filter: &str) -> Self {
        Self {
            nodes,
            log_file: log_file.to_string(),
            interval,
            filter: filter.to_string(),
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the monitoring thread.
    pub fn start(&self, net: Arc<dyn EmuNet>, registry: Arc<ConnectionRegistry>) {
        let mut tails = self.build_tails(net.as_ref());
        let filter = self.filter.clone();
        let interval = self.interval;
        let quit = self.quit.clone();

        info!(log_file = %self.log_file, nodes = tails.len(), "log monitor started");
        std::thread::Builder::new()
            .name("log-monitor".to_string())
            .spawn(move || {
                while !quit.load(Ordering::Relaxed) {
                    let counts = scan(&mut tails, &filter);
                    registry.broadcast_msg(&RpcMessage::push(
                        funcs::MONITOR_COUNTS,
                        obj_counts(&counts),
                    ));
                    std::thread::sleep(interval);
                }
            })
            .expect("failed to spawn log-monitor thread");
    }

    pub fn stop(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    fn build_tails(&self, net: &dyn EmuNet) -> Vec<(String, Tail)> {
        self.nodes
            .iter()
            .filter_map(|node| {
                let home = net.host_home(node)?;
                Some((
                    node.clone(),
                    Tail {
                        path: home.join(&self.log_file),
                        reader: None,
                    },
                ))
            })
            .collect()
    }
}

fn scan(tails: &mut [(String, Tail)], filter: &str) -> HashMap<String, u64> {
    tails
        .iter_mut()
        .map(|(node, tail)| (node.clone(), tail.count_new(filter)))
        .collect()
}

fn obj_counts(counts: &HashMap<String, u64>) -> Value {
    Value::Map(
        counts
            .iter()
            .map(|(node, count)| {
                (
                    Value::Text(node.clone()),
                    Value::Integer((*count).into()),
                )
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tail_for(dir: &std::path::Path) -> Tail {
        Tail {
            path: dir.join("node.log"),
            reader: None,
        }
    }

    #[test]
    fn counts_only_new_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        std::fs::write(&path, "Interest /a\nData /a\nInterest /b\n").unwrap();

        let mut tail = tail_for(dir.path());
        assert_eq!(tail.count_new("Interest"), 2);
        // Nothing new since the last scan.
        assert_eq!(tail.count_new("Interest"), 0);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Interest /c").unwrap();
        writeln!(file, "Nack /c").unwrap();
        assert_eq!(tail.count_new("Interest"), 1);
    }

    #[test]
    fn empty_filter_counts_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("node.log"), "a\nb\n").unwrap();

        let mut tail = tail_for(dir.path());
        assert_eq!(tail.count_new(""), 2);
    }

    #[test]
    fn missing_file_counts_zero_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut tail = tail_for(dir.path());
        assert_eq!(tail.count_new(""), 0);

        std::fs::write(dir.path().join("node.log"), "late\n").unwrap();
        assert_eq!(tail.count_new(""), 1);
    }

    #[test]
    fn counts_become_a_text_keyed_map() {
        let counts = HashMap::from([("h1".to_string(), 3u64)]);
        let value = obj_counts(&counts);
        let map = value.as_map().unwrap();
        assert_eq!(map[0].0.as_text(), Some("h1"));
        assert_eq!(map[0].1, Value::Integer(3.into()));
    }

    #[test]
    fn started_monitor_broadcasts_counts() {
        use crate::net::{EmuNet, LocalNet};
        use crate::registry::ConnectionRegistry;
        use netplay_core::codec;

        let dir = tempfile::tempdir().unwrap();
        let net: Arc<dyn EmuNet> = Arc::new(LocalNet::new(
            dir.path().join("hosts"),
            dir.path().to_path_buf(),
        ));
        net.add_host("h1").unwrap();
        std::fs::write(net.host_home("h1").unwrap().join("node.log"), "Interest /a\n").unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let (_conn, mut rx) = registry.register();

        let monitor = LogMonitor::new(
            vec!["h1".to_string()],
            "node.log",
            Duration::from_millis(10),
            "Interest",
        );
        monitor.start(net, registry);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut saw_count = false;
        while std::time::Instant::now() < deadline && !saw_count {
            if let Ok(frame) = rx.try_recv() {
                let msg: RpcMessage = codec::decode(&frame).unwrap();
                assert_eq!(msg.fun, funcs::MONITOR_COUNTS);
                let map = msg.result.unwrap();
                let map = map.as_map().unwrap().to_vec();
                if map[0].1 == Value::Integer(1.into()) {
                    saw_count = true;
                }
            } else {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        assert!(saw_count, "expected a monitor_counts push with the match");
        monitor.stop();
    }
}
