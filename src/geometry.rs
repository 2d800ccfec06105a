//! Geometry shapes shared by stored drawing elements and interpreted commands.
//!
//! Element geometry is persisted as free-form JSON so clients can round-trip
//! extra keys, but it must deserialize into the shape matching the element's
//! type. Field names follow the drawing client's camelCase convention.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CadError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Line,
    Polyline,
    Rectangle,
    Circle,
    Arc,
    Text,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Polyline => "polyline",
            Self::Rectangle => "rectangle",
            Self::Circle => "circle",
            Self::Arc => "arc",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(Self::Line),
            "polyline" => Ok(Self::Polyline),
            "rectangle" => Ok(Self::Rectangle),
            "circle" => Ok(Self::Circle),
            "arc" => Ok(Self::Arc),
            "text" => Ok(Self::Text),
            _ => Err(format!("Invalid element type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineGeometry {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineGeometry {
    pub points: Vec<Point>,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectangleGeometry {
    pub top_left: Point,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleGeometry {
    pub center: Point,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcGeometry {
    pub center: Point,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

fn default_font_size() -> f64 {
    12.0
}

fn default_font_family() -> String {
    "Arial".to_string()
}

fn default_horizontal_align() -> String {
    "left".to_string()
}

fn default_vertical_align() -> String {
    "middle".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextGeometry {
    pub position: Point,
    pub content: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_horizontal_align")]
    pub horizontal_align: String,
    #[serde(default = "default_vertical_align")]
    pub vertical_align: String,
}

/// A geometry payload decoded according to its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Line(LineGeometry),
    Polyline(PolylineGeometry),
    Rectangle(RectangleGeometry),
    Circle(CircleGeometry),
    Arc(ArcGeometry),
    Text(TextGeometry),
}

impl Geometry {
    /// Decode `value` as the geometry of an element of type `element_type`.
    pub fn parse(element_type: ElementType, value: &serde_json::Value) -> Result<Self, CadError> {
        fn decode<T: serde::de::DeserializeOwned>(
            element_type: ElementType,
            value: &serde_json::Value,
        ) -> Result<T, CadError> {
            T::deserialize(value).map_err(|e| CadError::InvalidGeometry {
                element_type: element_type.to_string(),
                message: e.to_string(),
            })
        }

        let geometry = match element_type {
            ElementType::Line => Self::Line(decode(element_type, value)?),
            ElementType::Polyline => Self::Polyline(decode(element_type, value)?),
            ElementType::Rectangle => Self::Rectangle(decode(element_type, value)?),
            ElementType::Circle => Self::Circle(decode(element_type, value)?),
            ElementType::Arc => Self::Arc(decode(element_type, value)?),
            ElementType::Text => Self::Text(decode(element_type, value)?),
        };
        Ok(geometry)
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Line(_) => ElementType::Line,
            Self::Polyline(_) => ElementType::Polyline,
            Self::Rectangle(_) => ElementType::Rectangle,
            Self::Circle(_) => ElementType::Circle,
            Self::Arc(_) => ElementType::Arc,
            Self::Text(_) => ElementType::Text,
        }
    }
}
