//! Teardown completion signal returned by `FilterEffect::stop`
//!
//! An effect may run an exit animation of any length before it is fully
//! stopped. `stop()` hands back a [`Teardown`] future and keeps the paired
//! [`TeardownHandle`], completing it (usually from `step()`) once the exit
//! animation has finished.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

/// Reasons a teardown did not complete cleanly
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeardownError {
    /// The effect reported a failure while stopping
    #[error("teardown failed: {0}")]
    Failed(String),
    /// The handle was dropped without being completed
    #[error("teardown handle dropped before completion")]
    Abandoned,
}

/// Create a connected handle/signal pair
pub fn teardown_pair() -> (TeardownHandle, Teardown) {
    let (tx, rx) = oneshot::channel();
    (TeardownHandle { tx }, Teardown { rx })
}

/// Completion side, owned by the effect being stopped
#[derive(Debug)]
pub struct TeardownHandle {
    tx: oneshot::Sender<Result<(), TeardownError>>,
}

impl TeardownHandle {
    /// Signal that the exit animation finished
    pub fn complete(self) {
        // The waiter may already be gone (cleared surface, timed out); nothing to do then.
        let _ = self.tx.send(Ok(()));
    }

    /// Signal that teardown failed
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(TeardownError::Failed(reason.into())));
    }
}

/// Waiting side, awaited by the engine
#[derive(Debug)]
pub struct Teardown {
    rx: oneshot::Receiver<Result<(), TeardownError>>,
}

impl Teardown {
    /// A teardown that has already completed
    pub fn ready() -> Self {
        let (handle, teardown) = teardown_pair();
        handle.complete();
        teardown
    }

    /// A teardown that has already failed
    pub fn failed(reason: impl Into<String>) -> Self {
        let (handle, teardown) = teardown_pair();
        handle.fail(reason);
        teardown
    }
}

impl Future for Teardown {
    type Output = Result<(), TeardownError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TeardownError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
