// Workflow management commands

use crate::client::{Client, ClientError};
use crate::output::{print_field, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Start a new workflow for a repository
    Start {
        /// Repository identifier (e.g. "org/repo")
        #[arg(long)]
        repository: String,

        /// Goal text for the coding agent
        goal: String,

        /// Planning hint passed through to the planning step
        #[arg(long)]
        hint: Option<String>,

        /// Iteration cap for VALIDATING -> PLANNING cycles
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Merge the PR automatically once validation succeeds
        #[arg(long)]
        auto_merge: bool,

        /// Skip the plan-confirmation step
        #[arg(long)]
        auto_confirm: bool,
    },

    /// Show a workflow's current state
    Show {
        /// Workflow ID
        id: Uuid,
    },

    /// Cancel a running workflow
    Cancel {
        /// Workflow ID
        id: Uuid,
    },
}

#[derive(Debug, Serialize)]
struct StartWorkflowRequest {
    repository: String,
    goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    planning_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
    auto_confirm_plan: bool,
    auto_merge: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkflowMetadataView {
    initial_goal: String,
    current_iteration: u32,
    max_iterations: u32,
    current_pr_number: Option<u64>,
    validation_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkflowView {
    id: Uuid,
    state: String,
    metadata: WorkflowMetadataView,
    final_error: Option<String>,
}

pub async fn run(command: WorkflowCommand, client: &Client, output: OutputFormat, quiet: bool) -> Result<()> {
    match command {
        WorkflowCommand::Start {
            repository,
            goal,
            hint,
            max_iterations,
            auto_merge,
            auto_confirm,
        } => start(client, output, quiet, repository, goal, hint, max_iterations, auto_merge, auto_confirm).await,
        WorkflowCommand::Show { id } => show(client, output, id).await,
        WorkflowCommand::Cancel { id } => cancel(client, output, id).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn start(
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    repository: String,
    goal: String,
    hint: Option<String>,
    max_iterations: Option<u32>,
    auto_merge: bool,
    auto_confirm: bool,
) -> Result<()> {
    let request = StartWorkflowRequest {
        repository,
        goal,
        planning_hint: hint,
        max_iterations,
        auto_confirm_plan: auto_confirm,
        auto_merge,
    };

    let workflow: WorkflowView = client.post("/v1/workflows", &request).await?;

    if output.is_text() {
        if quiet {
            println!("{}", workflow.id);
        } else {
            println!("Started workflow: {}", workflow.id);
            print_field("State", &workflow.state);
            print_field("Goal", &workflow.metadata.initial_goal);
        }
    } else {
        output.print_value(&workflow);
    }

    Ok(())
}

async fn show(client: &Client, output: OutputFormat, id: Uuid) -> Result<()> {
    let workflow: WorkflowView = client
        .get(&format!("/v1/workflows/{}", id))
        .await
        .map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("workflow not found: {}", id),
            e => e.into(),
        })?;

    if output.is_text() {
        print_field("ID", &workflow.id.to_string());
        print_field("State", &workflow.state);
        print_field("Goal", &workflow.metadata.initial_goal);
        print_field(
            "Iteration",
            &format!("{}/{}", workflow.metadata.current_iteration, workflow.metadata.max_iterations),
        );
        if let Some(pr) = workflow.metadata.current_pr_number {
            print_field("PR", &pr.to_string());
        }
        if let Some(err) = &workflow.final_error {
            print_field("Error", err);
        }
    } else {
        output.print_value(&workflow);
    }

    Ok(())
}

async fn cancel(client: &Client, output: OutputFormat, id: Uuid) -> Result<()> {
    client
        .post_no_body(&format!("/v1/workflows/{}/cancel", id))
        .await
        .map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("workflow not found: {}", id),
            e => e.into(),
        })?;

    if output.is_text() {
        println!("Cancelled workflow: {}", id);
    } else {
        output.print_value(&serde_json::json!({ "id": id, "status": "cancelled" }));
    }

    Ok(())
}
