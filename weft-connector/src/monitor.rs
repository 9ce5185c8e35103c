//! Background connection supervisor.
//!
//! A single monitor task runs per connector. Each tick it either issues a
//! heartbeat ping or, when the link is down, clears the association flag
//! and reconnects. The task ends on the shutdown signal or on a fatal
//! connection error.

use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;

use crate::connector::Shared;
use crate::error::{ConnectionError, ConnectionResult};
use crate::transport::ConnectionState;

pub(crate) async fn run(
    shared: Weak<Shared>,
    heartbeat_interval: Duration,
    max_connect_attempts: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ConnectionResult<()> {
    loop {
        tokio::select! {
            // Fires on the shutdown signal, or when the connector is
            // dropped and the sender goes with it.
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(heartbeat_interval) => {}
        }

        let Some(state) = shared.upgrade() else { break };
        let Some(transport) = state.transport() else {
            continue;
        };

        if transport.state() != ConnectionState::Open {
            #[cfg(feature = "tracing")]
            tracing::warn!("connection to the broker lost; retrying");

            state.associated.store(false, Ordering::SeqCst);
            match transport.connect(max_connect_attempts).await {
                Ok(()) => {}
                Err(e @ ConnectionError::Fatal(_)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("the connection monitor will stop: {}", e);

                    state.monitoring.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                Err(_e) => {
                    // Transient: keep trying on the next tick.
                    #[cfg(feature = "tracing")]
                    tracing::error!("connection monitor failure: {}", _e);
                }
            }
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!("sending heartbeat ping");

            if let Err(_e) = transport.ping() {
                #[cfg(feature = "tracing")]
                tracing::error!("heartbeat failure: {}", _e);
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::info!("stopping the connection monitor");

    if let Some(state) = shared.upgrade() {
        state.monitoring.store(false, Ordering::SeqCst);
    }
    Ok(())
}
