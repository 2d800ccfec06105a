//! Natural-language drawing command interpreter.
//!
//! ## Overview
//!
//! A command such as `"crear línea de 1,1 a 3,3"` is lower-cased and
//! trimmed, then checked against an ordered list of [`CommandTemplate`]s.
//! The first template whose trigger phrase occurs in the text extracts the
//! parameters; later templates are never consulted, even if extraction
//! fails. No match at all yields the fixed "command not recognized" error.
//!
//! ```text
//! "  Crear Línea de 1,1 a 3,3 "
//!        │ normalize
//!        v
//! "crear línea de 1,1 a 3,3" ──> LineTemplate (es) ──> create_line {start, end}
//!                                LineTemplate (en)
//!                                RectangleTemplate (es)
//!                                RectangleTemplate (en)
//! ```
//!
//! Interpretation is a pure function of the text: it never fails, never
//! panics and keeps no state, so one [`Interpreter`] is shared by every
//! request handler.

pub mod action;
pub mod templates;

use serde::{Deserialize, Serialize};

pub use action::{ActionKind, ActionParams, LineParams, RectangleParams};
pub use templates::{
    CommandTemplate, ENGLISH_LINE, ENGLISH_RECTANGLE, InterpretError, LineTemplate,
    RectangleTemplate, SPANISH_LINE, SPANISH_RECTANGLE,
};

/// Error reported when no trigger phrase occurs in the command.
pub const NOT_RECOGNIZED: &str = "command not recognized";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    /// Target project. Ownership is checked by the caller; interpretation
    /// does not depend on it.
    pub project_id: i64,
}

/// Outcome of interpreting one command.
///
/// Either `recognized` is true and `action`/`params` are set, or it is
/// false and only `error` is set. Build it through [`CommandResponse::recognized`]
/// and [`CommandResponse::rejected`] to keep that shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    pub recognized: bool,
    pub action: Option<ActionKind>,
    pub params: Option<ActionParams>,
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn recognized(command: String, params: ActionParams) -> Self {
        Self {
            command,
            recognized: true,
            action: Some(params.kind()),
            params: Some(params),
            error: None,
        }
    }

    pub fn rejected(command: String, error: impl Into<String>) -> Self {
        Self {
            command,
            recognized: false,
            action: None,
            params: None,
            error: Some(error.into()),
        }
    }
}

/// Lower-case and trim a raw command.
pub fn normalize(command: &str) -> String {
    command.to_lowercase().trim().to_string()
}

pub struct Interpreter {
    templates: Vec<Box<dyn CommandTemplate>>,
}

impl Default for Interpreter {
    /// Line templates before rectangle templates, Spanish before English.
    fn default() -> Self {
        Self::new(vec![
            Box::new(LineTemplate::new(SPANISH_LINE)),
            Box::new(LineTemplate::new(ENGLISH_LINE)),
            Box::new(RectangleTemplate::new(SPANISH_RECTANGLE)),
            Box::new(RectangleTemplate::new(ENGLISH_RECTANGLE)),
        ])
    }
}

impl Interpreter {
    /// Build an interpreter that tries `templates` in order.
    pub fn new(templates: Vec<Box<dyn CommandTemplate>>) -> Self {
        Self { templates }
    }

    pub fn template_names(&self) -> Vec<&'static str> {
        self.templates.iter().map(|t| t.name()).collect()
    }

    pub fn process(&self, request: &CommandRequest) -> CommandResponse {
        self.interpret(&request.command)
    }

    pub fn interpret(&self, raw: &str) -> CommandResponse {
        let command = normalize(raw);

        let Some(template) = self.templates.iter().find(|t| t.matches(&command)) else {
            return CommandResponse::rejected(command, NOT_RECOGNIZED);
        };

        match template.extract(&command) {
            Ok(params) => CommandResponse::recognized(command, params),
            Err(e) => CommandResponse::rejected(command, format!("could not interpret command: {}", e)),
        }
    }
}
