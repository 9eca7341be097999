//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for a termination signal (SIGINT, SIGTERM, SIGHUP, SIGQUIT)
//! - Report which signal arrived so the caller can log it and drain
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Non-unix targets only listen for Ctrl-C

use std::fmt;

/// Signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Hangup => "SIGHUP",
            StopSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Block until one of the termination signals is delivered.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<StopSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        _ = interrupt.recv() => StopSignal::Interrupt,
        _ = terminate.recv() => StopSignal::Terminate,
        _ = hangup.recv() => StopSignal::Hangup,
        _ = quit.recv() => StopSignal::Quit,
    };

    tracing::info!(signal = %received, "Received signal");
    Ok(received)
}

/// Block until Ctrl-C is delivered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<StopSignal> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = %StopSignal::Interrupt, "Received signal");
    Ok(StopSignal::Interrupt)
}
