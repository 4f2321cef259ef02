//! Sandbox provisioning, command execution, and guaranteed teardown
//! (spec.md §4.2).

mod error;
mod handle;
mod manager;
mod registry;

pub use error::{CommandError, SandboxSetupError, SourceCloneError};
pub use forgeloop_schemas::sandbox::{SandboxId, SandboxState};
pub use handle::{CommandResult, ProgressCallback, SandboxHandle, StreamKind, CANCELLED_EXIT_CODE, TIMEOUT_EXIT_CODE};
pub use manager::{InitSpec, SandboxManager};
pub use registry::install_shutdown_hook;
