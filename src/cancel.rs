//! Cancellation bridge - converts Ctrl-C into a cooperative flag.
//!
//! The flag transitions false -> true at most once and is never reset.
//! The run loop reads it between iterations and the envelope scanner reads
//! it between nodes; store operations are never interrupted mid-flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, warn};

/// Cloneable handle over the process-wide cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns true if this call performed the
    /// false -> true transition, false if the flag was already set.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Non-blocking read of the flag.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install the Ctrl-C handler and wire it to the flag.
///
/// Installing the handler suppresses the default immediate-termination
/// behavior, so the in-flight message can finish and the run loop observes
/// the flag at its next check point. The first interrupt sets the flag and
/// logs a warning; later interrupts are no-ops since the flag cannot be
/// unset.
pub fn bridge_ctrl_c(flag: CancelFlag) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for interrupt signal: {}", e);
                return;
            }
            if flag.cancel() {
                warn!("Interrupt requested, finishing current message before exit");
            }
        }
    })
}
