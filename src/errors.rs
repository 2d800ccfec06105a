//! Typed error hierarchy for the CAD backend.
//!
//! `CadError` covers the domain failures the store and the auth layer can
//! report. Store functions return `anyhow::Result` and wrap these with
//! `anyhow::Error::from`, so the API layer can downcast and pick a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Layer {id} not found")]
    LayerNotFound { id: i64 },

    #[error("Element {id} not found")]
    ElementNotFound { id: i64 },

    #[error("Settings for project {project_id} not found")]
    SettingsNotFound { project_id: i64 },

    #[error("A user with this email or username already exists")]
    UserAlreadyExists,

    #[error("Incorrect username or password")]
    InvalidCredentials,

    #[error("Inactive account")]
    InactiveUser,

    #[error("Could not validate credentials")]
    Unauthorized,

    #[error("Not enough privileges")]
    Forbidden,

    #[error("Invalid geometry for {element_type}: {message}")]
    InvalidGeometry {
        element_type: String,
        message: String,
    },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CadError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotFound { .. }
                | Self::LayerNotFound { .. }
                | Self::ElementNotFound { .. }
                | Self::SettingsNotFound { .. }
        )
    }
}
