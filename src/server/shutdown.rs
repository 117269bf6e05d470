use tokio::sync::watch;

pub(crate) fn shutdown_signal() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(());

    (ShutdownHandle { _tx: tx }, ShutdownSignal { rx })
}

/// Dropping the handle fires every clone of its signal.
pub(crate) struct ShutdownHandle {
    _tx: watch::Sender<()>,
}

/// Shared by the RPC server and every client session it spawns.
#[derive(Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<()>,
}

impl ShutdownSignal {
    pub(crate) async fn recv(mut self) {
        // The handle never sends, it only drops.
        while self.rx.changed().await.is_ok() {}
    }
}
