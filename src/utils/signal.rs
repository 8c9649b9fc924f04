//! Shutdown signals for the companion daemon

use std::fmt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

/// Signal that ended the daemon's serve loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    Hangup,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Hangup => "SIGHUP",
        };
        f.write_str(name)
    }
}

/// Resolve once SIGTERM, SIGINT or SIGHUP arrives
///
/// A signal whose handler cannot be installed is skipped; if none can
/// be installed this falls back to Ctrl+C and reports it as SIGINT.
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    let listen = |kind: SignalKind, name: &str| match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register {} handler: {}", name, e);
            None
        }
    };
    let mut sigterm = listen(SignalKind::terminate(), "SIGTERM");
    let mut sigint = listen(SignalKind::interrupt(), "SIGINT");
    let mut sighup = listen(SignalKind::hangup(), "SIGHUP");

    if sigterm.is_none() && sigint.is_none() && sighup.is_none() {
        let _ = tokio::signal::ctrl_c().await;
        return ShutdownSignal::Interrupt;
    }

    async fn recv(s: &mut Option<tokio::signal::unix::Signal>) {
        match s {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    tokio::select! {
        _ = recv(&mut sigterm) => ShutdownSignal::Terminate,
        _ = recv(&mut sigint) => ShutdownSignal::Interrupt,
        _ = recv(&mut sighup) => ShutdownSignal::Hangup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Hangup.to_string(), "SIGHUP");
    }
}
