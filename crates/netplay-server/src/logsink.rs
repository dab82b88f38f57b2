//! Forwarding of server log output to the GUI console terminal.
//!
//! A `UiLogSink` is installed as a `tracing` fmt-layer writer at startup
//! with an empty tap; once the `cli` session exists, the tap is bound and
//! every formatted log line travels the session's output path (pushed to
//! all clients, appended to the replay buffer).

use crate::registry::ConnectionRegistry;
use crate::session::PtySession;
use netplay_core::RpcMessage;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

struct Tap {
    session: Arc<PtySession>,
    registry: Arc<ConnectionRegistry>,
}

/// Cloneable writer handle; all clones share one installable tap.
#[derive(Clone)]
pub struct UiLogSink {
    tap: Arc<Mutex<Option<Tap>>>,
}

impl UiLogSink {
    pub fn new() -> Self {
        Self {
            tap: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind the sink to the console session. Lines written before this
    /// point are dropped.
    pub fn install(&self, session: Arc<PtySession>, registry: Arc<ConnectionRegistry>) {
        *self.tap.lock().unwrap() = Some(Tap { session, registry });
    }
}

impl Default for UiLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for UiLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(tap) = self.tap.lock().unwrap().as_ref() {
            tap.registry
                .broadcast_msg(&RpcMessage::pty_out(&tap.session.id, buf));
            tap.session.append_output(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for UiLogSink {
    type Writer = UiLogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netplay_core::codec;
    use std::io::Write;

    #[test]
    fn uninstalled_sink_swallows_writes() {
        let mut sink = UiLogSink::new();
        assert_eq!(sink.write(b"dropped").unwrap(), 7);
    }

    #[test]
    fn installed_sink_pushes_and_buffers() {
        let sink = UiLogSink::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let (_id, mut rx) = registry.register();
        let session = PtySession::open("cli", "Console", 1024).unwrap();
        sink.install(session.clone(), registry);

        let mut writer = sink.make_writer();
        writer.write_all(b"started\n").unwrap();

        let frame = rx.try_recv().unwrap();
        let msg: RpcMessage = codec::decode(&frame).unwrap();
        assert_eq!(msg.fun, "pty_out");
        assert_eq!(msg.id.as_deref(), Some("cli"));
        assert_eq!(session.snapshot(), b"started\n");
    }
}
