//! Explicit request context threaded through core calls.

use core::fmt;
use std::sync::Arc;

/// Carries the trace identifier of the operation that triggered a core call.
///
/// The transport layer builds one per inbound request; background tasks build
/// their own with a descriptive name (e.g. `refill-orders`). Cloning is cheap.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestContext {
    trace_id: Arc<str>,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<Arc<str>>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// Context for work that is not tied to an inbound request.
    pub fn background(name: impl fmt::Display) -> Self {
        Self::new(name.to_string())
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trace_id)
    }
}
