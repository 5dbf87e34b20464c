//! Per-request context.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State owned by one handler invocation: the request id, the
/// cancellation token armed by timeouts or caller disconnect, and the
/// start instant for completion logging.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub cancel: CancellationToken,
    pub started: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            started: Instant::now(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
