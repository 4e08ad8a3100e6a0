//! Work performed off the caller's path: format conversion, staging, process
//! execution, and the host session seam.

mod convert;
mod process;
mod session;
mod staging;

pub use convert::{ensure_non_empty, CommandConverter, FormatConverter, DEFAULT_CONVERTER};
pub use process::{describe_exit, ProcessExecutor, ProcessHandle, WaitOutcome};
pub use session::{DirectorySession, HostSession, ImportedMesh};
pub use staging::{JobWorkspace, MeshStagingPipeline};

use tokio::sync::watch;

/// Sending half of a cancellation request. Cancelling is idempotent.
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

impl CancelTrigger {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, observed by every wait inside a job.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested; pends forever otherwise.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|c| *c).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_fires_after_trigger() {
        let (trigger, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        trigger.cancel();
        trigger.cancel();
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("signal should resolve");
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn never_signal_pends() {
        let mut signal = CancelSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
