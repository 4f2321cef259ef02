//! Process-wide registry of sandboxes awaiting destruction.
//!
//! spec.md §4.2: "any create() that ever returned must, on program exit or
//! container reclaim, eventually destroy the sandbox (registered in a
//! global pending set and released by a shutdown hook)." `destroy()`
//! deregisters on its own; [`install_shutdown_hook`] sweeps anything still
//! registered when the process is asked to stop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use forgeloop_schemas::sandbox::SandboxId;
use tracing::{info, warn};

use crate::handle::SandboxHandle;

fn pending() -> &'static Mutex<HashMap<SandboxId, Arc<SandboxHandle>>> {
    static PENDING: OnceLock<Mutex<HashMap<SandboxId, Arc<SandboxHandle>>>> = OnceLock::new();
    PENDING.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn register(handle: Arc<SandboxHandle>) {
    pending().lock().unwrap().insert(handle.id, handle);
}

pub(crate) fn deregister(id: SandboxId) {
    pending().lock().unwrap().remove(&id);
}

pub(crate) fn snapshot() -> Vec<Arc<SandboxHandle>> {
    pending().lock().unwrap().values().cloned().collect()
}

/// Spawns a task that waits for a Ctrl-C / SIGTERM-equivalent signal, then
/// destroys every sandbox still in the pending set. Intended to be called
/// once from a binary's `main` (e.g. `forgeloop-api`).
pub fn install_shutdown_hook() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install ctrl_c handler; guaranteed-release shutdown hook inactive");
            return;
        }
        let stragglers = snapshot();
        if stragglers.is_empty() {
            return;
        }
        info!(count = stragglers.len(), "sweeping undestroyed sandboxes on shutdown");
        for handle in stragglers {
            let id = handle.id;
            if let Err(err) = crate::manager::destroy_handle(&handle).await {
                warn!(sandbox_id = %id, %err, "failed to destroy sandbox during shutdown sweep");
            }
            deregister(id);
        }
    });
}

#[cfg(test)]
pub(crate) fn pending_count() -> usize {
    pending().lock().unwrap().len()
}
