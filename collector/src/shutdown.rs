use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use tokio::signal;

/// Flag raised on ctrl-c. Workers check it before picking up a task, tasks
/// already running are allowed to finish.
pub fn must_exit_handle() -> Arc<AtomicBool> {
    let handle = Arc::new(AtomicBool::new(false));
    let task_handle = Arc::clone(&handle);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupted, finishing running tasks");
                task_handle.store(true, atomic::Ordering::Relaxed);
            }
            Err(error) => {
                tracing::error!(%error, "Error receiving interrupt signal")
            }
        }
    });
    handle
}
