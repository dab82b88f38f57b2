//! Terminal lifecycle management and the I/O multiplex loop.
//!
//! One dedicated thread owns all controller descriptors: it reaps sessions
//! whose attached process exited, waits for readiness with a bounded tick
//! so liveness and registration changes are observed promptly, and forwards
//! output to the connected clients and each session's replay buffer.

use super::pty::PtySession;
use crate::registry::ConnectionRegistry;
use netplay_core::RpcMessage;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::HashMap;
use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

nix::ioctl_read_bad!(fionread, nix::libc::FIONREAD, nix::libc::c_int);

pub struct PtyManager {
    sessions: Mutex<HashMap<String, Arc<PtySession>>>,
    registry: Arc<ConnectionRegistry>,
    /// Poll timeout; bounds how long process-exit detection can lag.
    tick: Duration,
    /// Per-iteration read ceiling for a single descriptor.
    read_chunk: usize,
}

impl PtyManager {
    pub fn new(registry: Arc<ConnectionRegistry>, tick: Duration, read_chunk: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            registry,
            tick,
            read_chunk,
        })
    }

    /// Start the multiplex loop on its own thread.
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        std::thread::Builder::new()
            .name("pty-mux".to_string())
            .spawn(move || loop {
                manager.run_once();
            })
            .expect("failed to spawn pty-mux thread");
    }

    /// Make a session visible to the multiplex loop. Safe to call from any
    /// thread; the loop picks it up on its next iteration.
    pub fn register(&self, session: Arc<PtySession>) {
        let mut sessions = self.sessions.lock().unwrap();
        info!(id = %session.id, name = %session.name, "terminal registered");
        sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<PtySession>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<PtySession>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Remove a session and finalize it.
    pub fn close_session(&self, id: &str) {
        let session = self.sessions.lock().unwrap().remove(id);
        if let Some(session) = session {
            self.finalize(&session);
            debug!(id = %session.id, live = self.count(), "session removed");
        }
    }

    /// Notify clients and release descriptors, exactly once per session
    /// even when two shutdown paths race.
    fn finalize(&self, session: &PtySession) {
        if !session.mark_closed() {
            return;
        }
        info!(id = %session.id, "terminal closed");
        self.registry
            .broadcast_msg(&RpcMessage::close_term(&session.id));
        session.release();
    }

    /// One iteration of the multiplex loop: reap, then poll and drain.
    pub fn run_once(&self) {
        self.reap_exited();
        self.poll_io();
    }

    /// Close every session whose attached process has exited.
    fn reap_exited(&self) {
        let exited: Vec<String> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .filter(|s| s.has_child() && s.child_exited())
                .map(|s| s.id.clone())
                .collect()
        };
        for id in exited {
            debug!(id = %id, "attached process exited");
            self.close_session(&id);
        }
    }

    /// Wait for readiness across all live controllers and service them.
    fn poll_io(&self) {
        // Holding the Arcs keeps every descriptor open for the duration of
        // the poll; releases happen on this thread only.
        let live: Vec<(Arc<PtySession>, i32)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .filter(|s| !s.is_closed())
                .filter_map(|s| s.controller_fd().map(|fd| (s.clone(), fd)))
                .collect()
        };

        if live.is_empty() {
            std::thread::sleep(self.tick);
            return;
        }

        let timeout = PollTimeout::from(self.tick.as_millis().min(u16::MAX as u128) as u16);
        let mut fds: Vec<PollFd> = live
            .iter()
            .map(|(_, raw)| {
                let fd = unsafe { BorrowedFd::borrow_raw(*raw) };
                PollFd::new(fd, PollFlags::POLLIN)
            })
            .collect();

        let ready = match poll(&mut fds, timeout) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "poll failed");
                std::thread::sleep(self.tick);
                return;
            }
        };
        if ready == 0 {
            return;
        }

        let events: Vec<PollFlags> = fds
            .iter()
            .map(|fd| fd.revents().unwrap_or(PollFlags::empty()))
            .collect();
        drop(fds);

        for ((session, raw), revents) in live.iter().zip(events) {
            if revents.contains(PollFlags::POLLIN) {
                self.read_ready(session, *raw);
            } else if revents
                .intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
            {
                debug!(id = %session.id, "controller hang-up");
                self.close_session(&session.id);
            }
        }
    }

    /// Drain at most `read_chunk` bytes from one ready controller.
    fn read_ready(&self, session: &Arc<PtySession>, raw: i32) {
        let mut available: nix::libc::c_int = 0;
        if let Err(e) = unsafe { fionread(raw, &mut available) } {
            warn!(id = %session.id, error = %e, "FIONREAD failed");
            self.close_session(&session.id);
            return;
        }

        let to_read = (available.max(0) as usize).min(self.read_chunk);
        if to_read == 0 {
            return;
        }

        let mut buf = vec![0u8; to_read];
        // Borrowed descriptor: ManuallyDrop keeps the File from closing it.
        let mut file = std::mem::ManuallyDrop::new(unsafe {
            <std::fs::File as std::os::fd::FromRawFd>::from_raw_fd(raw)
        });
        match std::io::Read::read(&mut *file, &mut buf) {
            Ok(0) => self.close_session(&session.id),
            Ok(n) => {
                self.registry
                    .broadcast_msg(&RpcMessage::pty_out(&session.id, &buf[..n]));
                session.append_output(&buf[..n]);
            }
            Err(e) => {
                debug!(id = %session.id, error = %e, "read error");
                self.close_session(&session.id);
            }
        }
    }
}
