use tokio::sync::watch;

/// Sending half of a shutdown signal. Cloning it shares the same channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Notifies every subscribed [`ShutdownRx`].
    ///
    /// Fails only when no receiver is left, which callers treat as already shut down.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Subscribes a receiver that observes only signals sent from now on.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiving half of a shutdown signal; `changed().await` resolves on shutdown.
pub type ShutdownRx = watch::Receiver<()>;

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
