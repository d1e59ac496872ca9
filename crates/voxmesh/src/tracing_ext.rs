//! Tracing extensions: per-operation timing spans.
//!
//! Enable with `RUST_LOG=voxmesh=debug` (or `voxmesh::timing=debug` for the
//! timing events alone).

use std::time::Instant;
use tracing::{Span, debug, info};

/// A performance timer that logs its duration on drop.
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("vox_operation", operation = name);
        debug!(target: "voxmesh::timing", operation = name, "starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer carrying mesh-size context fields.
    pub fn with_context(name: &'static str, vertex_count: usize, face_count: usize) -> Self {
        let span = tracing::info_span!(
            "vox_operation",
            operation = name,
            vertices = vertex_count,
            faces = face_count
        );
        debug!(
            target: "voxmesh::timing",
            operation = name,
            vertices = vertex_count,
            faces = face_count,
            "starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "voxmesh::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = OperationTimer::new("test_op");
        assert!(timer.elapsed_ms() >= 0.0);
    }
}
