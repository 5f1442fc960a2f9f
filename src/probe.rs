//! Local TCP port availability check.
//!
//! This is a pre-check only: nothing stops another process from taking the
//! port between the probe and the moment the tunnel binds it.

use std::net::{Ipv4Addr, TcpListener};

use tracing::debug;

/// Returns `true` if `0.0.0.0:port` can be bound right now.
///
/// The probe socket is closed before returning.
pub fn port_available(port: u16) -> bool {
    debug!("Testing port {port}");
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            debug!("Port {port} unavailable: {e}");
            false
        }
    }
}
