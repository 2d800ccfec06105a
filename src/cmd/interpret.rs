//! One-shot command interpretation: `cadnlp interpret "<command>"`.

use anyhow::{Context, Result};

use cadnlp::interpreter::{CommandRequest, Interpreter};

/// Print the response for `command` as pretty JSON. Unrecognized commands
/// are a normal outcome, not a process failure.
pub fn cmd_interpret(command: &str, project_id: i64) -> Result<()> {
    let request = CommandRequest {
        command: command.to_string(),
        project_id,
    };
    let response = Interpreter::default().process(&request);
    tracing::debug!(
        recognized = response.recognized,
        action = response.action.map(|a| a.as_str()),
        "Command interpreted"
    );
    let json = serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
    println!("{}", json);
    Ok(())
}
