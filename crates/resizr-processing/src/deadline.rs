use resizr_core::{TransformError, TransformResult};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cooperative deadline checked between pipeline stages
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    token: CancellationToken,
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            expires_at: Some(Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    /// Deadline that never expires on its own
    pub fn none() -> Self {
        Self {
            expires_at: None,
            token: CancellationToken::new(),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Token that aborts the invocation at its next check when cancelled
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self, stage: &'static str) -> TransformResult<()> {
        if self.token.is_cancelled() {
            tracing::debug!(stage = stage, "Processing cancelled");
            return Err(TransformError::Cancelled { stage });
        }
        if self.is_expired() {
            tracing::warn!(stage = stage, "Processing deadline exceeded");
            return Err(TransformError::Timeout { stage });
        }
        Ok(())
    }
}
