// mdsaad Ops — user-level operations
// Thin logic over the engine: each op validates input, decides the
// proxy-vs-direct route, consults the cache where the operation is
// cacheable, and normalizes the outcome for the CLI layer.

pub mod chat;
pub mod convert;
pub mod weather;

use crate::atoms::error::CallError;
use crate::atoms::types::{CallPayload, Capability, Reply};
use crate::engine::proxy::ProxyOutcome;
use crate::engine::transport::CancelToken;
use crate::engine::Core;

/// The shared proxy-first routing policy: try the proxy layer, interpret
/// `Exhausted` as "go direct", and let rate limits and client errors from
/// the proxy surface without a direct fallback.
pub(crate) async fn proxy_then_direct(
    core: &Core,
    capability: Capability,
    payload: CallPayload,
    options: &crate::engine::dispatcher::CallOptions,
) -> Result<Reply, CallError> {
    match core.proxy.call(capability, &payload, &options.cancel).await? {
        ProxyOutcome::Reply(reply) => Ok(reply),
        ProxyOutcome::Exhausted(trace) => {
            if !trace.is_empty() {
                log::info!(
                    "[ops] proxy exhausted after {} attempts, dispatching direct",
                    trace.len()
                );
            }
            core.dispatcher.call(capability, payload, options).await
        }
    }
}

/// Cancellation plumbing shared by every op entry point.
pub(crate) fn options_with_cancel(cancel: &CancelToken) -> crate::engine::dispatcher::CallOptions {
    crate::engine::dispatcher::CallOptions {
        cancel: cancel.clone(),
        ..Default::default()
    }
}
