//! Planning / Break-Epic: orchestrates an external
//! LLM CLI call to propose child tasks for an epic, then batch-creates them.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::beads::{BeadFields, BeadsClient, DependencyType};

#[derive(Debug, Deserialize)]
pub struct ProposedChild {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Calls the configured CLI tool with a break-epic prompt and expects a
/// JSON array of `{title, description}` objects on stdout.
#[instrument(skip(cli_tool, epic_title, epic_description))]
async fn propose_children(
    cli_tool: &str,
    epic_title: &str,
    epic_description: &str,
) -> Result<Vec<ProposedChild>> {
    let prompt = format!(
        "Break the following epic into concrete child tasks. \
         Respond with a JSON array of objects with \"title\" and \"description\" fields only.\n\n\
         Epic: {epic_title}\n\n{epic_description}"
    );

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        Command::new(cli_tool)
            .arg("-p")
            .arg(&prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .context("planning CLI call timed out")?
    .context("failed to spawn planning CLI")?;

    if !output.status.success() {
        anyhow::bail!(
            "planning CLI exited non-zero: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find('[').unwrap_or(0);
    serde_json::from_str(&stdout[json_start..]).context("failed to parse proposed children JSON")
}

/// Proposes children for `epic_id` via the external LLM CLI, then
/// batch-creates them as beads linked by a parent-child dependency.
#[instrument(skip(beads))]
pub async fn break_epic(
    beads: &BeadsClient,
    cli_tool: &str,
    epic_id: &str,
) -> Result<Vec<String>> {
    let epic = beads.show(epic_id).await.context("failed to load epic")?;
    let children = propose_children(
        cli_tool,
        &epic.title,
        epic.description.as_deref().unwrap_or(""),
    )
    .await?;

    let mut created_ids = Vec::with_capacity(children.len());
    for child in children {
        let fields = BeadFields {
            title: Some(child.title),
            description: child.description,
            ..Default::default()
        };
        match beads.create(&fields).await {
            Ok(id) => {
                if let Err(e) = beads
                    .add_dependency(&id, epic_id, DependencyType::ParentChild)
                    .await
                {
                    warn!(error = %e, child_id = %id, "failed to link child to epic");
                }
                created_ids.push(id);
            }
            Err(e) => warn!(error = %e, "failed to create proposed child bead"),
        }
    }

    Ok(created_ids)
}
