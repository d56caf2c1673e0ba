//! Stop signals for long-running commands.

use tokio::signal::ctrl_c;
#[cfg(target_family = "unix")]
use tokio::signal::unix::*;

/// Fires on Ctrl-C, or on SIGTERM where there is one.
pub struct Shutdown {
    #[cfg(target_family = "unix")]
    sigterm: Signal,
}

impl Shutdown {
    /// Must be called inside a Tokio runtime.
    pub fn new() -> std::io::Result<Self> {
        #[cfg(target_family = "unix")]
        let sigterm = signal(SignalKind::terminate())?;

        Ok(Self {
            #[cfg(target_family = "unix")]
            sigterm,
        })
    }

    pub async fn listen(&mut self) {
        #[cfg(target_family = "unix")]
        tokio::select! {
            _ = ctrl_c() => (),
            _ = self.sigterm.recv() => (),
        }

        #[cfg(not(target_family = "unix"))]
        let _ = ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_quiet_without_signal() {
        let mut shutdown = Shutdown::new().unwrap();
        let waited = timeout(Duration::from_millis(20), shutdown.listen()).await;
        assert!(waited.is_err());
    }
}
