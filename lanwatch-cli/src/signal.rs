//! Waiting for an operator interrupt

use tracing::debug;

/// Resolve on Ctrl+C, or on SIGTERM where it exists
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                debug!("Received SIGINT");
                result
            }
            _ = terminate.recv() => {
                debug!("Received SIGTERM");
                Ok(())
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        debug!("Received Ctrl+C");
        Ok(())
    }
}
