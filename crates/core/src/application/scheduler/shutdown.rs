// Cooperative shutdown for the scheduler loop.
//
// A watch channel carries a single stop flag; the loop selects on `wait` so
// both the idle sleep and the error-backoff sleep end promptly when the
// daemon stops. Dropping the sender counts as shutdown.

use tokio::sync::watch;

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Flip the stop flag; every token clone observes it
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is signalled or the sender is gone
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
