//! Cancellation channel
//!
//! User interrupts travel as plain messages. The Ctrl-C listener only pushes
//! an `Interrupt` into the channel; whoever owns the `Interrupts` receiver
//! decides what to terminate and when to resume.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One user interrupt request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt;

#[derive(Debug, Clone)]
pub struct InterruptSender {
    tx: mpsc::UnboundedSender<Interrupt>,
}

impl InterruptSender {
    /// Returns false once the receiving side is gone
    pub fn interrupt(&self) -> bool {
        self.tx.send(Interrupt).is_ok()
    }
}

#[derive(Debug)]
pub struct Interrupts {
    rx: mpsc::UnboundedReceiver<Interrupt>,
}

impl Interrupts {
    /// Wait for the next interrupt. `None` when every sender has been dropped.
    pub async fn recv(&mut self) -> Option<Interrupt> {
        self.rx.recv().await
    }

    /// Discard interrupts that arrived while the previous one was handled.
    /// Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

pub fn channel() -> (InterruptSender, Interrupts) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InterruptSender { tx }, Interrupts { rx })
}

/// Forward every Ctrl-C to `sender` until the receiver goes away
pub fn listen_for_ctrl_c(sender: InterruptSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            debug!("Ctrl-C received");
            if !sender.interrupt() {
                return;
            }
        }
    })
}

/// Anything that can be asked to stop its running processes from any thread
pub trait Terminate {
    fn terminate(&self);
}

impl Terminate for crate::runner::Runner {
    fn terminate(&self) {
        crate::runner::Runner::terminate(self);
    }
}

impl<T: Terminate + ?Sized> Terminate for std::sync::Arc<T> {
    fn terminate(&self) {
        (**self).terminate();
    }
}

pub fn terminate_all<T: Terminate>(targets: &[T]) {
    for target in targets {
        target.terminate();
    }
}
