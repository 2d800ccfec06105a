//! Command templates: a trigger phrase plus a fixed sequence of substring
//! splits that pulls numbers out of the matched text.
//!
//! Splits are plain substring splits, so a delimiter such as `"a"` also
//! matches inside words. Segment selection mirrors `str::split` indexing:
//! "after" a delimiter means the text between its first and second
//! occurrence; "before" means the text up to its first occurrence.

use std::num::ParseFloatError;

use thiserror::Error;

use super::action::{ActionParams, LineParams, RectangleParams};
use crate::geometry::Point;

/// Why a matched command could not be turned into parameters.
///
/// Callers only ever see the rendered message; the variants exist so the
/// message says what went wrong.
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("expected '{delimiter}' in command")]
    MissingDelimiter { delimiter: &'static str },

    #[error("expected two comma-separated coordinates in '{segment}', found {found}")]
    CoordinateCount { segment: String, found: usize },

    #[error("invalid number '{token}': {source}")]
    InvalidNumber {
        token: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("number '{token}' is not finite")]
    NonFinite { token: String },
}

/// One entry of the interpreter's ordered template list.
pub trait CommandTemplate: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the normalized command selects this template.
    fn matches(&self, command: &str) -> bool;

    /// Pull the action parameters out of a command that `matches`.
    fn extract(&self, command: &str) -> Result<ActionParams, InterpretError>;
}

// ── Split helpers ─────────────────────────────────────────────────────

fn after<'a>(text: &'a str, delimiter: &'static str) -> Result<&'a str, InterpretError> {
    text.split(delimiter)
        .nth(1)
        .ok_or(InterpretError::MissingDelimiter { delimiter })
}

fn before<'a>(text: &'a str, delimiter: &str) -> &'a str {
    text.split(delimiter).next().unwrap_or(text)
}

fn parse_number(token: &str) -> Result<f64, InterpretError> {
    let token = token.trim();
    let value: f64 = token
        .parse()
        .map_err(|source| InterpretError::InvalidNumber {
            token: token.to_string(),
            source,
        })?;
    if !value.is_finite() {
        return Err(InterpretError::NonFinite {
            token: token.to_string(),
        });
    }
    Ok(value)
}

fn parse_point(segment: &str) -> Result<Point, InterpretError> {
    let segment = segment.trim();
    let coords: Vec<&str> = segment.split(',').collect();
    if coords.len() != 2 {
        return Err(InterpretError::CoordinateCount {
            segment: segment.to_string(),
            found: coords.len(),
        });
    }
    Ok(Point::new(parse_number(coords[0])?, parse_number(coords[1])?))
}

// ── Line ──────────────────────────────────────────────────────────────

/// Words of a line command: `<trigger> <from> x,y <to> x,y`.
#[derive(Debug, Clone, Copy)]
pub struct LineVocabulary {
    pub triggers: &'static [&'static str],
    pub from: &'static str,
    pub to: &'static str,
}

pub const SPANISH_LINE: LineVocabulary = LineVocabulary {
    triggers: &["crear línea"],
    from: "de",
    to: "a",
};

pub const ENGLISH_LINE: LineVocabulary = LineVocabulary {
    triggers: &["create line"],
    from: "from",
    to: "to",
};

#[derive(Debug, Clone, Copy)]
pub struct LineTemplate {
    vocabulary: LineVocabulary,
}

impl LineTemplate {
    pub fn new(vocabulary: LineVocabulary) -> Self {
        Self { vocabulary }
    }
}

impl CommandTemplate for LineTemplate {
    fn name(&self) -> &'static str {
        self.vocabulary.triggers[0]
    }

    fn matches(&self, command: &str) -> bool {
        self.vocabulary.triggers.iter().any(|t| command.contains(t))
    }

    fn extract(&self, command: &str) -> Result<ActionParams, InterpretError> {
        let v = &self.vocabulary;
        let coords = after(command, v.from)?;
        let end = after(coords, v.to)?;
        let start = before(coords, v.to);

        Ok(ActionParams::Line(LineParams {
            start: parse_point(start)?,
            end: parse_point(end)?,
        }))
    }
}

// ── Rectangle ─────────────────────────────────────────────────────────

/// Words of a rectangle command:
/// `<trigger> <at> x,y <with> <width> w <and> <height> h`.
#[derive(Debug, Clone, Copy)]
pub struct RectangleVocabulary {
    pub triggers: &'static [&'static str],
    pub at: &'static str,
    pub with: &'static str,
    pub width: &'static str,
    pub and: &'static str,
    pub height: &'static str,
}

pub const SPANISH_RECTANGLE: RectangleVocabulary = RectangleVocabulary {
    triggers: &["crear rectángulo", "crear rectangulo"],
    at: "en",
    with: "con",
    width: "ancho",
    and: "y",
    height: "alto",
};

pub const ENGLISH_RECTANGLE: RectangleVocabulary = RectangleVocabulary {
    triggers: &["create rectangle"],
    at: "in",
    with: "with",
    width: "width",
    and: "and",
    height: "height",
};

#[derive(Debug, Clone, Copy)]
pub struct RectangleTemplate {
    vocabulary: RectangleVocabulary,
}

impl RectangleTemplate {
    pub fn new(vocabulary: RectangleVocabulary) -> Self {
        Self { vocabulary }
    }
}

impl CommandTemplate for RectangleTemplate {
    fn name(&self) -> &'static str {
        self.vocabulary.triggers[0]
    }

    fn matches(&self, command: &str) -> bool {
        self.vocabulary.triggers.iter().any(|t| command.contains(t))
    }

    fn extract(&self, command: &str) -> Result<ActionParams, InterpretError> {
        let v = &self.vocabulary;
        let position = before(after(command, v.at)?, v.with);
        let top_left = parse_point(position)?;

        let width = parse_number(before(after(command, v.width)?, v.and))?;
        let height = parse_number(after(command, v.height)?)?;

        Ok(ActionParams::Rectangle(RectangleParams {
            top_left,
            width,
            height,
        }))
    }
}
