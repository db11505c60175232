//! Telemetry utilities for frame timing and span construction.

use std::time::Instant;

/// Records frame handling latency when dropped.
pub struct FrameTimer {
    frame: &'static str,
    start: Instant,
}

impl FrameTimer {
    pub fn new(frame: &'static str) -> Self {
        Self {
            frame,
            start: Instant::now(),
        }
    }
}

impl Drop for FrameTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_frame(self.frame, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use std::net::SocketAddr;
    use tracing::{Span, info_span};

    use crate::hub::ConnId;

    /// Span for the lifetime of one client connection.
    pub fn connection(conn: ConnId, addr: SocketAddr) -> Span {
        info_span!("connection", conn = %conn, addr = %addr, user_id = tracing::field::Empty)
    }

    /// Span for a single inbound frame.
    pub fn frame(name: &'static str) -> Span {
        tracing::debug_span!("frame", frame = name)
    }
}
