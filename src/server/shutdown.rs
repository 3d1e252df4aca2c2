use tokio_util::sync::CancellationToken;

pub fn shutdown_signal() -> (ShutdownHandle, ShutdownSignal) {
    let token = CancellationToken::new();

    (ShutdownHandle { token: token.clone() }, ShutdownSignal { token })
}

/// Dropping the handle shuts down every task holding a matching `ShutdownSignal`.
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub async fn recv(&self) {
        self.token.cancelled().await
    }
}
