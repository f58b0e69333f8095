//! Async command surface over [`CameraLifecycle`](crate::lifecycle::CameraLifecycle).
//!
//! Every command hands blocking work to tokio's blocking pool and reports failures as
//! display strings, so any transport (HTTP, IPC, a UI plugin) can forward them as-is.

pub mod camera;
pub mod detect;
pub mod stats;

pub use camera::*;
pub use detect::*;
pub use stats::*;

use crate::errors::ScanError;
use crate::lifecycle::CameraLifecycle;

/// Run `op` on the blocking pool with its own handle to the lifecycle.
pub(crate) async fn blocking<T, F>(lifecycle: &CameraLifecycle, op: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(CameraLifecycle) -> Result<T, ScanError> + Send + 'static,
{
    let handle = lifecycle.clone();
    tokio::task::spawn_blocking(move || op(handle))
        .await
        .map_err(|e| format!("Task join error: {}", e))?
        .map_err(|e| e.to_string())
}
