//! Start/stop gate shared by the control server and the transport loop
//!
//! Control handlers flip the state; the transport thread blocks on the
//! condition variable while idle and is woken by the `START` transition.
//! Closing the gate releases every waiter for shutdown.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{ControlCommand, ControlReply, StreamState};

#[derive(Debug)]
struct GateInner {
    state: StreamState,
    closed: bool,
}

/// Shared `IDLE` / `STREAMING` state with blocking wait
#[derive(Debug)]
pub struct ControlGate {
    inner: Mutex<GateInner>,
    changed: Condvar,
}

/// Thread-safe handle to the gate
pub type SharedControlGate = Arc<ControlGate>;

impl ControlGate {
    /// New gate in the `IDLE` state
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: StreamState::Idle,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn shared() -> SharedControlGate {
        Arc::new(Self::new())
    }

    /// Set the state. Returns true if it changed.
    pub fn set(&self, state: StreamState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == state {
            return false;
        }
        inner.state = state;
        drop(inner);

        self.changed.notify_all();
        true
    }

    /// Transition to `STREAMING` (idempotent)
    pub fn start(&self) -> bool {
        let changed = self.set(StreamState::Streaming);
        if changed {
            tracing::info!("Streaming started");
        }
        changed
    }

    /// Transition to `IDLE` (idempotent)
    pub fn stop(&self) -> bool {
        let changed = self.set(StreamState::Idle);
        if changed {
            tracing::info!("Streaming stopped");
        }
        changed
    }

    /// Apply a control command and produce its reply
    pub fn apply(&self, command: ControlCommand) -> ControlReply {
        match command {
            ControlCommand::Start => {
                self.start();
                ControlReply::Started
            }
            ControlCommand::Stop => {
                self.stop();
                ControlReply::Stopped
            }
            ControlCommand::Status => ControlReply::Status(self.state()),
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    /// Block until streaming. Returns false once the gate is closed.
    pub fn wait_for_streaming(&self) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return false;
            }
            if inner.state == StreamState::Streaming {
                return true;
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Like [`wait_for_streaming`](Self::wait_for_streaming) but gives up
    /// after `timeout`, returning the streaming state at that point
    pub fn wait_for_streaming_timeout(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if !inner.closed && inner.state != StreamState::Streaming {
            let _ = self.changed.wait_while_for(
                &mut inner,
                |inner| !inner.closed && inner.state != StreamState::Streaming,
                timeout,
            );
        }
        !inner.closed && inner.state == StreamState::Streaming
    }

    /// Release all waiters permanently
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Default for ControlGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_initial_state_is_idle() {
        let gate = ControlGate::new();
        assert_eq!(gate.state(), StreamState::Idle);
        assert!(!gate.is_streaming());
    }

    #[test]
    fn test_start_start_stop_stop_is_idle() {
        let gate = ControlGate::new();
        let replies: Vec<ControlReply> = [
            ControlCommand::Start,
            ControlCommand::Start,
            ControlCommand::Stop,
            ControlCommand::Stop,
        ]
        .into_iter()
        .map(|cmd| gate.apply(cmd))
        .collect();

        assert_eq!(
            replies,
            vec![
                ControlReply::Started,
                ControlReply::Started,
                ControlReply::Stopped,
                ControlReply::Stopped,
            ]
        );
        assert_eq!(gate.state(), StreamState::Idle);
    }

    #[test]
    fn test_start_stop_start_is_streaming() {
        let gate = ControlGate::new();
        assert_eq!(gate.apply(ControlCommand::Start), ControlReply::Started);
        assert_eq!(gate.apply(ControlCommand::Stop), ControlReply::Stopped);
        assert_eq!(gate.apply(ControlCommand::Start), ControlReply::Started);
        assert!(gate.is_streaming());
        assert_eq!(
            gate.apply(ControlCommand::Status),
            ControlReply::Status(StreamState::Streaming)
        );
    }

    #[test]
    fn test_set_reports_change() {
        let gate = ControlGate::new();
        assert!(gate.start());
        assert!(!gate.start());
        assert!(gate.stop());
        assert!(!gate.stop());
    }

    #[test]
    fn test_waiter_wakes_on_start() {
        let gate = ControlGate::shared();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let streaming = gate.wait_for_streaming();
                (streaming, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        gate.start();

        let (streaming, waited) = waiter.join().unwrap();
        assert!(streaming);
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn test_close_releases_waiter() {
        let gate = ControlGate::shared();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_for_streaming())
        };

        thread::sleep(Duration::from_millis(20));
        gate.close();
        assert!(!waiter.join().unwrap());
        assert!(gate.is_closed());
    }

    #[test]
    fn test_wait_timeout() {
        let gate = ControlGate::new();
        assert!(!gate.wait_for_streaming_timeout(Duration::from_millis(10)));
        gate.start();
        assert!(gate.wait_for_streaming_timeout(Duration::from_millis(10)));
    }
}
