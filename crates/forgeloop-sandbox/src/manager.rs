use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use forgeloop_schemas::sandbox::{SandboxId, SandboxState};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CommandError, SandboxSetupError, SourceCloneError};
use crate::handle::{run_to_completion, SandboxHandle};
use crate::registry;

/// Parameters for provisioning a sandbox, beyond the project/PR identity.
#[derive(Debug, Clone, Default)]
pub struct InitSpec {
    pub env: HashMap<String, String>,
    /// Dependency-install or other preparation commands, run in order
    /// against the fresh workspace before `create` returns.
    pub prep_commands: Vec<String>,
    /// When `true`, `exec` does not serialize concurrent calls. Default
    /// (`false`) matches spec.md §4.2's "by default: serial".
    pub parallel_exec: bool,
}

/// Provisions and tears down sandboxes rooted under a single directory.
#[derive(Clone)]
pub struct SandboxManager {
    workspace_root: PathBuf,
}

impl SandboxManager {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    #[instrument(skip(self, init_spec), fields(project_name, pr_number))]
    pub async fn create(
        &self,
        project_name: &str,
        pr_number: u64,
        init_spec: InitSpec,
    ) -> Result<Arc<SandboxHandle>, SandboxSetupError> {
        let id: SandboxId = Uuid::now_v7();
        let dir_name = format!("{project_name}-pr{pr_number}-{id}");
        let workspace = self.workspace_root.join(dir_name);

        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(SandboxSetupError::Workspace)?;

        let handle = Arc::new(SandboxHandle::new(
            id,
            workspace.clone(),
            init_spec.env.clone(),
            init_spec.parallel_exec,
        ));
        handle.transition(SandboxState::Ready).await;

        for command in &init_spec.prep_commands {
            match run_to_completion(command, &workspace, &init_spec.env).await {
                Ok((0, _)) => {}
                Ok((exit_code, _stderr)) => {
                    self.cleanup_workspace(&workspace).await;
                    return Err(SandboxSetupError::PreparationFailed {
                        command: command.clone(),
                        exit_code,
                    });
                }
                Err(err) => {
                    self.cleanup_workspace(&workspace).await;
                    return Err(SandboxSetupError::Workspace(err));
                }
            }
        }

        registry::register(handle.clone());
        info!(sandbox_id = %id, workspace = %workspace.display(), "sandbox created");
        Ok(handle)
    }

    async fn cleanup_workspace(&self, workspace: &PathBuf) {
        let _ = tokio::fs::remove_dir_all(workspace).await;
    }

    #[instrument(skip(self, handle), fields(sandbox_id = %handle.id))]
    pub async fn clone_source(
        &self,
        handle: &SandboxHandle,
        repo_ref: &str,
        branch: &str,
    ) -> Result<bool, SourceCloneError> {
        let target = handle.workspace.join("code");
        let command = format!(
            "git clone --branch {branch} --single-branch {repo_ref} {}",
            target.display()
        );
        let (exit_code, stderr) = run_to_completion(&command, &handle.workspace, &handle.env)
            .await
            .map_err(SourceCloneError::Spawn)?;

        if exit_code != 0 {
            return Err(SourceCloneError::NonZeroExit {
                repo_ref: repo_ref.to_string(),
                branch: branch.to_string(),
                exit_code,
                stderr,
            });
        }
        Ok(true)
    }

    pub fn cancel(&self, handle: &SandboxHandle) {
        handle.cancel();
    }

    #[instrument(skip(self, handle), fields(sandbox_id = %handle.id))]
    pub async fn destroy(&self, handle: &Arc<SandboxHandle>) -> Result<(), CommandError> {
        let result = destroy_handle(handle).await;
        registry::deregister(handle.id);
        result
    }
}

/// Tears down a sandbox's workspace and marks it DESTROYED. Idempotent —
/// called both from `SandboxManager::destroy` and from the shutdown-hook
/// sweep in [`crate::registry`].
pub(crate) async fn destroy_handle(handle: &Arc<SandboxHandle>) -> Result<(), CommandError> {
    if handle.state().await.is_terminal() {
        return Ok(());
    }
    handle.cancel();
    if !matches!(handle.state().await, SandboxState::Cleaning) {
        handle.transition(SandboxState::Cleaning).await;
    }
    tokio::fs::remove_dir_all(&handle.workspace)
        .await
        .or_else(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(err)
            }
        })
        .map_err(CommandError::Teardown)?;
    handle.transition(SandboxState::Destroyed).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::CANCELLED_EXIT_CODE;

    #[tokio::test]
    async fn create_then_destroy_releases_workspace() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let handle = manager
            .create("demo", 1, InitSpec::default())
            .await
            .unwrap();

        assert!(handle.workspace.exists());
        assert_eq!(handle.state().await, SandboxState::Ready);

        manager.destroy(&handle).await.unwrap();
        assert!(!handle.workspace.exists());
        assert_eq!(handle.state().await, SandboxState::Destroyed);
        assert_eq!(registry::pending_count(), 0);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let handle = manager
            .create("demo", 2, InitSpec::default())
            .await
            .unwrap();

        manager.destroy(&handle).await.unwrap();
        manager.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn failed_preparation_cleans_up_workspace() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let init_spec = InitSpec {
            prep_commands: vec!["exit 7".to_string()],
            ..Default::default()
        };

        let err = manager.create("demo", 3, init_spec).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxSetupError::PreparationFailed { exit_code: 7, .. }
        ));
    }

    #[tokio::test]
    async fn exec_streams_output_and_reports_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let handle = manager
            .create("demo", 4, InitSpec::default())
            .await
            .unwrap();

        let result = handle
            .exec(
                "echo hello; echo oops 1>&2; exit 3",
                std::time::Duration::from_secs(5),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(result.stdout.contains("hello"));
        assert!(result.stderr.contains("oops"));

        let log = handle.log_lines().await;
        assert!(log.iter().any(|l| l.starts_with("STDOUT: hello")));
        assert!(log.iter().any(|l| l.starts_with("STDERR: oops")));

        manager.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn exec_times_out_and_terminates_process() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let handle = manager
            .create("demo", 5, InitSpec::default())
            .await
            .unwrap();

        let result = handle
            .exec("sleep 5", std::time::Duration::from_millis(50), None)
            .await
            .unwrap();

        assert!(result.timed_out());
        manager.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_terminates_an_in_flight_command_promptly() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let handle = manager
            .create("demo", 7, InitSpec::default())
            .await
            .unwrap();

        let exec_handle = handle.clone();
        let exec_task = tokio::spawn(async move {
            exec_handle
                .exec("sleep 30", std::time::Duration::from_secs(30), None)
                .await
        });

        // give the child a moment to actually start before cancelling it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        manager.cancel(&handle);

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), exec_task)
            .await
            .expect("exec did not return within 5s of cancel()")
            .unwrap()
            .unwrap();

        assert_eq!(result.exit_code, CANCELLED_EXIT_CODE);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(handle.active_children(), 0);

        manager.destroy(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_rejects_subsequent_exec() {
        let root = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(root.path());
        let handle = manager
            .create("demo", 6, InitSpec::default())
            .await
            .unwrap();

        manager.cancel(&handle);
        let err = handle
            .exec("echo hi", std::time::Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
        manager.destroy(&handle).await.unwrap();
    }
}
