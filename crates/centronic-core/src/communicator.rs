//! Communicator thread
//!
//! Owns the transport and serializes all gateway I/O on one worker thread.
//! Callers enqueue finished packets through a bounded channel; inbound bytes
//! are scanned for frames and handed to an optional callback.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::protocol::{scan_frames, CentronicError, ReceivedFrame};
use crate::transport::Transport;

/// Handler invoked on the worker thread for every valid inbound frame
pub type FrameCallback = Box<dyn FnMut(ReceivedFrame) + Send>;

/// Communicator tuning knobs
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Outbound queue capacity in packets
    pub queue_capacity: usize,
    /// Worker loop pacing interval
    pub loop_interval: Duration,
    /// How long `send` blocks on a full queue before giving up
    pub send_timeout: Duration,
    /// How long `close` waits for the worker to drain and exit
    pub join_timeout: Duration,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            loop_interval: Duration::from_millis(10),
            send_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the communicator worker thread
pub struct Communicator {
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    send_timeout: Duration,
    join_timeout: Duration,
}

impl Communicator {
    /// Spawn the worker thread, taking ownership of the transport.
    ///
    /// The transport lives on the worker and is closed by it on exit. Inbound
    /// bytes are only read when a callback is installed; a write-only setup
    /// skips the receive path entirely.
    pub fn spawn(
        transport: Transport,
        callback: Option<FrameCallback>,
        config: CommunicatorConfig,
    ) -> Result<Self, CentronicError> {
        let (tx, rx) = bounded(config.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let loop_stop = Arc::clone(&stop);
        let loop_running = Arc::clone(&running);
        let interval = config.loop_interval;
        let handle = thread::Builder::new()
            .name("centronic-communicator".to_string())
            .spawn(move || {
                run_loop(transport, rx, callback, loop_stop, interval);
                loop_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CentronicError::Connection(format!("cannot spawn worker: {e}")))?;

        Ok(Self {
            tx,
            stop,
            running,
            handle: Some(handle),
            send_timeout: config.send_timeout,
            join_timeout: config.join_timeout,
        })
    }

    /// Enqueue one packet for transmission.
    ///
    /// Blocks up to the send timeout when the queue is full. A timeout means
    /// the worker stopped consuming, so the communicator is shut down and the
    /// send fails.
    pub fn send(&self, packet: Vec<u8>) -> Result<(), CentronicError> {
        if !self.is_running() {
            return Err(CentronicError::NotRunning);
        }
        match self.tx.send_timeout(packet, self.send_timeout) {
            Ok(()) => Ok(()),
            Err(_) => {
                error!("send queue stalled, stopping communicator");
                self.stop();
                Err(CentronicError::QueueFull)
            }
        }
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the worker to drain the queue and exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop the worker and wait for it to finish.
    ///
    /// The join runs under a watchdog so a wedged transport cannot hang the
    /// caller past the join timeout.
    pub fn close(&mut self) {
        self.stop();
        let Some(handle) = self.handle.take() else {
            return;
        };

        let (done_tx, done_rx) = mpsc::channel();
        let watchdog = thread::spawn(move || {
            let result = handle.join();
            let _ = done_tx.send(result);
        });
        match done_rx.recv_timeout(self.join_timeout) {
            Ok(Ok(())) => {
                let _ = watchdog.join();
                info!("communicator stopped");
            }
            Ok(Err(_)) => {
                let _ = watchdog.join();
                error!("communicator thread panicked");
            }
            Err(_) => {
                warn!(
                    timeout = ?self.join_timeout,
                    "communicator did not stop in time, detaching"
                );
            }
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_loop(
    mut transport: Transport,
    rx: Receiver<Vec<u8>>,
    mut callback: Option<FrameCallback>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        // At most one packet per pass keeps sends paced at the loop interval.
        match rx.try_recv() {
            Ok(packet) => {
                debug!(packet = %String::from_utf8_lossy(&packet), "sending packet");
                if let Err(e) = transport.write(&packet) {
                    error!(error = %e, "transport write failed, stopping");
                    break;
                }
            }
            Err(TryRecvError::Empty) => {
                // Stop only once the queue is drained.
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(TryRecvError::Disconnected) => break,
        }

        if callback.is_some() {
            match transport.read(&mut buffer) {
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "transport read failed, stopping");
                    break;
                }
            }
            dispatch_frames(&mut buffer, callback.as_mut());
        }

        thread::sleep(interval);
    }

    transport.close();
}

fn dispatch_frames(buffer: &mut Vec<u8>, callback: Option<&mut FrameCallback>) {
    if buffer.is_empty() {
        return;
    }
    let (frames, consumed) = scan_frames(buffer);
    if let Some(callback) = callback {
        for frame in frames {
            debug!(%frame, "received frame");
            // A panicking handler must not take later frames down with it.
            let result = catch_unwind(AssertUnwindSafe(|| callback(frame)));
            if result.is_err() {
                warn!("frame callback panicked");
            }
        }
    }
    buffer.drain(..consumed);
}
