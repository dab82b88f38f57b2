//! One pseudo-terminal session.
//!
//! Owns the controller/worker descriptor pair, the input write path, an
//! optional attached child process, and the replay buffer. Release of the
//! descriptors is idempotent because shutdown can be discovered from two
//! code paths at once (process exit vs. hang-up on poll).

use super::ring_buffer::ReplayBuffer;
use netplay_core::{PlayError, PlayResult};
use nix::pty::openpty;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

nix::ioctl_write_ptr_bad!(tiocswinsz, nix::libc::TIOCSWINSZ, nix::libc::winsize);

pub struct PtySession {
    /// Unique among live sessions.
    pub id: String,
    /// Human label shown in the GUI tab.
    pub name: String,
    controller: Mutex<Option<OwnedFd>>,
    worker: Mutex<Option<OwnedFd>>,
    child: Mutex<Option<Child>>,
    buffer: Mutex<ReplayBuffer>,
    closed: AtomicBool,
}

impl PtySession {
    /// Allocate an OS pty pair and wrap it in a session.
    pub fn open(id: &str, name: &str, ring_capacity: usize) -> PlayResult<Arc<Self>> {
        let pair = openpty(None, None)
            .map_err(|e| PlayError::Other(format!("openpty failed: {e}")))?;

        debug!(id, controller = pair.master.as_raw_fd(), "pty opened");

        Ok(Arc::new(Self {
            id: id.to_string(),
            name: name.to_string(),
            controller: Mutex::new(Some(pair.master)),
            worker: Mutex::new(Some(pair.slave)),
            child: Mutex::new(None),
            buffer: Mutex::new(ReplayBuffer::new(ring_capacity)),
            closed: AtomicBool::new(false),
        }))
    }

    /// Attach the external process driving the worker side.
    pub fn attach_child(&self, child: Child) {
        *self.child.lock().unwrap() = Some(child);
    }

    pub fn has_child(&self) -> bool {
        self.child.lock().unwrap().is_some()
    }

    /// Whether the attached process has exited. Sessions without an
    /// attached process (embedded consoles) never report exit here.
    pub fn child_exited(&self) -> bool {
        let mut child = self.child.lock().unwrap();
        match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    /// Forward bytes verbatim to the worker program's standard input.
    pub fn write_input(&self, data: &[u8]) -> PlayResult<()> {
        let guard = self.controller.lock().unwrap();
        let fd = guard
            .as_ref()
            .ok_or_else(|| PlayError::TerminalNotFound(self.id.clone()))?;

        let mut remaining = data;
        while !remaining.is_empty() {
            let n = nix::unistd::write(fd, remaining)
                .map_err(|e| PlayError::Io(std::io::Error::from(e)))?;
            remaining = &remaining[n..];
        }
        Ok(())
    }

    /// Set the terminal window size.
    pub fn resize(&self, rows: u16, cols: u16) -> PlayResult<()> {
        let guard = self.controller.lock().unwrap();
        let fd = guard
            .as_ref()
            .ok_or_else(|| PlayError::TerminalNotFound(self.id.clone()))?;

        let size = nix::libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        unsafe { tiocswinsz(fd.as_raw_fd(), &size) }
            .map_err(|e| PlayError::Other(format!("resize failed: {e}")))?;
        Ok(())
    }

    /// Raw controller descriptor for the multiplex loop, if still open.
    pub fn controller_fd(&self) -> Option<RawFd> {
        self.controller.lock().unwrap().as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Duplicate the worker descriptor (for child stdio or an embedded
    /// console's streams).
    pub fn worker_handle(&self) -> PlayResult<OwnedFd> {
        let guard = self.worker.lock().unwrap();
        let fd = guard
            .as_ref()
            .ok_or_else(|| PlayError::TerminalNotFound(self.id.clone()))?;
        fd.try_clone().map_err(PlayError::Io)
    }

    /// Append emitted output to the replay buffer.
    pub fn append_output(&self, data: &[u8]) {
        self.buffer.lock().unwrap().write(data);
    }

    /// Chronological copy of the replay buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.lock().unwrap().snapshot()
    }

    /// One-shot transition out of the live state. Returns true for the
    /// caller that won the race; every later caller gets false.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop both descriptors. Safe to call any number of times.
    pub fn release(&self) {
        let controller = self.controller.lock().unwrap().take();
        let worker = self.worker.lock().unwrap().take();
        drop(controller);
        drop(worker);
    }
}
