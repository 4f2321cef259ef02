use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxSetupError {
    #[error("failed to provision workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("preparation command failed: {command} (exit {exit_code})")]
    PreparationFailed { command: String, exit_code: i32 },
}

#[derive(Debug, Error)]
pub enum SourceCloneError {
    #[error("clone of {repo_ref}#{branch} failed with exit code {exit_code}: {stderr}")]
    NonZeroExit {
        repo_ref: String,
        branch: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to spawn clone command: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sandbox is already running a command and does not allow concurrent exec")]
    ConcurrentExecDenied,

    #[error("sandbox is in terminal state and cannot accept commands")]
    Destroyed,

    #[error("sandbox was cancelled")]
    Cancelled,

    #[error("failed to tear down workspace: {0}")]
    Teardown(#[source] std::io::Error),
}
