//! Helper for shutdown signals

use futures::{
    channel::oneshot,
    future::{FusedFuture, Shared},
    FutureExt,
};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

/// Cheap boolean the HTTP handlers poll before serving a request
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Marks the process as shutting down
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Future that resolves when the shutdown event has fired
#[derive(Clone)]
pub struct Shutdown {
    rx: Shared<oneshot::Receiver<()>>,
    flag: ShutdownFlag,
}

impl Shutdown {
    /// Returns the flag the loops and handlers check between await points
    pub fn flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }
}

impl Future for Shutdown {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();
        if pin.rx.is_terminated() || pin.rx.poll_unpin(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Shutdown signal that fires either manually or on drop by closing the channel
pub struct Signal {
    tx: oneshot::Sender<()>,
    flag: ShutdownFlag,
}

impl Signal {
    /// Fire the signal manually.
    pub fn fire(self) {
        self.flag.set();
        let _ = self.tx.send(());
    }
}

/// Create a channel pair that's used to propagate the shutdown event
pub fn signal() -> (Signal, Shutdown) {
    let (tx, rx) = oneshot::channel();
    let flag = ShutdownFlag::default();
    (Signal { tx, flag: flag.clone() }, Shutdown { rx: rx.shared(), flag })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_on_fire() {
        let (signal, shutdown) = signal();
        let cloned = shutdown.clone();
        assert!(!shutdown.flag().is_set());
        signal.fire();
        cloned.await;
        shutdown.clone().await;
        assert!(shutdown.flag().is_set());
    }
}
