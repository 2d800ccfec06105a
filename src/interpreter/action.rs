use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Drawing actions a recognized command can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateLine,
    CreateRectangle,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateLine => "create_line",
            Self::CreateRectangle => "create_rectangle",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineParams {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectangleParams {
    pub top_left: Point,
    pub width: f64,
    pub height: f64,
}

/// Parameters extracted from a recognized command, one variant per action.
///
/// Serialized without a tag: the active variant's fields are the whole
/// `params` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionParams {
    Line(LineParams),
    Rectangle(RectangleParams),
}

impl ActionParams {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Line(_) => ActionKind::CreateLine,
            Self::Rectangle(_) => ActionKind::CreateRectangle,
        }
    }
}
