use tracing::{debug, info};

use crate::record::{ExecutionRecord, Outcome};

/// Result of a cancellation request against one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The record was pending or running and is now canceled
    Canceled,
    /// The record was terminal, or its process had already exited; the
    /// outcome is unchanged
    AlreadyFinished,
}

/// Cancel a record, racing safely against its natural completion.
///
/// Under the record lock the cancellation token fires and, unless the record
/// is already terminal or its process has already exited, the record is
/// finalized as canceled at this instant. For an exited process the token
/// only cuts the output drain short.
/// The runner owning the child reacts to the token with a hard kill; the
/// process gets no grace period. A record canceled while still pending is
/// never spawned.
pub fn cancel(record: &ExecutionRecord) -> CancelOutcome {
    let mut state = record.lock_state();

    record.cancellation_token().cancel();

    if !state.is_cancelable() {
        debug!(
            execution_id = %record.id(),
            status = %state.response.status,
            "Cancel ignored, execution already finished"
        );
        return CancelOutcome::AlreadyFinished;
    }

    state.finalize(Outcome::Canceled);
    info!(
        execution_id = %record.id(),
        pid = ?state.response.pid,
        "Execution canceled"
    );
    CancelOutcome::Canceled
}
