//! Completion inference
//!
//! A remote command has no structural done-signal: the PTY only reports an
//! exit when the whole shell dies, not when one command finishes. Completion
//! is therefore inferred from output silence. Every chunk resets the
//! session's inactivity clock; a checker starts after a grace period equal to
//! the inactivity threshold and then re-checks on a fixed cadence until the
//! clock has been quiet for the full threshold.
//!
//! This is a documented approximation: a command that is silent for longer
//! than the threshold (a long sleep, say) is reported as finished while still
//! running.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::registry::{SessionId, SessionRegistry};

/// Wait until `id` has produced no output for `threshold`.
///
/// Returns `true` when silence was detected. Returns `false` when the checker
/// was cancelled or the session left the registry first (teardown won the
/// race); the caller must then do nothing.
pub(crate) async fn wait_for_silence(
    registry: Arc<SessionRegistry>,
    id: SessionId,
    threshold: Duration,
    poll: Duration,
    cancel: CancellationToken,
) -> bool {
    // Grace period: no point checking before the threshold could have elapsed.
    tokio::select! {
        _ = cancel.cancelled() => return false,
        _ = sleep(threshold) => {}
    }

    loop {
        let Some(last_output) = registry.last_output(&id) else {
            return false; // Session already removed
        };
        let quiet = Instant::now().duration_since(last_output);
        if quiet >= threshold {
            trace!(session_id = %id, quiet_ms = quiet.as_millis() as u64, "Silence threshold reached");
            return true;
        }

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(poll) => {}
        }
    }
}
