use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Abnormal exit of a supervised actor's run loop.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("{actor}: downstream channel closed")]
    ChannelClosed { actor: &'static str },

    #[error("{actor}: slot pool closed")]
    SlotsClosed { actor: &'static str },

    #[error("{actor}: run loop panicked: {message}")]
    Panicked { actor: &'static str, message: String },

    #[error("{actor}: {message}")]
    Failed { actor: &'static str, message: String },
}

/// The admission queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("admission queue at capacity ({capacity})")]
pub struct AtCapacity {
    pub capacity: usize,
}

/// No signature showed up within the retrieval budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("signature not available after {waited_ms}ms")]
pub struct TimedOut {
    pub waited_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_error_display_names_actor() {
        let err = ActorError::ChannelClosed {
            actor: "signature-store",
        };
        assert_eq!(err.to_string(), "signature-store: downstream channel closed");
    }

    #[test]
    fn at_capacity_display() {
        assert_eq!(
            AtCapacity { capacity: 300 }.to_string(),
            "admission queue at capacity (300)"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServiceError>();
        assert_send_sync::<ActorError>();
    }
}
