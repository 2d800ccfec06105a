use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::ElementType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: String,
}

/// A user row including the password hash. Never serialized to clients.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub user_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            _ => Err(format!("Invalid unit system: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UiTheme {
    Light,
    Dark,
}

impl UiTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl FromStr for UiTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(format!("Invalid UI theme: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSettings {
    pub id: i64,
    pub project_id: i64,
    pub unit_system: UnitSystem,
    /// Grid cell size in metres or feet, depending on `unit_system`.
    pub grid_spacing: f64,
    pub grid_subdivisions: i32,
    pub grid_visible: bool,
    pub axes_visible: bool,
    pub snap_to_grid: bool,
    pub ui_theme: UiTheme,
    pub grid_color: String,
    pub background_color: String,
    pub advanced_settings: serde_json::Value,
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettingsPatch {
    pub unit_system: Option<UnitSystem>,
    pub grid_spacing: Option<f64>,
    pub grid_subdivisions: Option<i32>,
    pub grid_visible: Option<bool>,
    pub axes_visible: Option<bool>,
    pub snap_to_grid: Option<bool>,
    pub ui_theme: Option<UiTheme>,
    pub grid_color: Option<String>,
    pub background_color: Option<String>,
    pub advanced_settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectWithSettings {
    #[serde(flatten)]
    pub project: Project,
    pub settings: Option<ProjectSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub color: String,
    /// Render order; higher draws on top.
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLayer {
    pub project_id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "default_layer_color")]
    pub color: String,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    pub color: Option<String>,
    pub order: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerList {
    pub layers: Vec<Layer>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementStyle {
    pub stroke_color: String,
    pub stroke_width: f64,
    /// solid, dashed, ...
    pub line_type: String,
    pub fill_color: String,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: i64,
    pub project_id: i64,
    pub layer_id: i64,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub geometry: serde_json::Value,
    pub style: ElementStyle,
    pub selected: bool,
    pub locked: bool,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewElement {
    pub project_id: i64,
    pub layer_id: i64,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub geometry: serde_json::Value,
    pub style: ElementStyle,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementPatch {
    #[serde(rename = "type")]
    pub element_type: Option<ElementType>,
    pub layer_id: Option<i64>,
    pub geometry: Option<serde_json::Value>,
    pub style: Option<ElementStyle>,
    pub selected: Option<bool>,
    pub locked: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

/// One entry of a bulk update: the element id plus the fields to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementPatchWithId {
    pub id: i64,
    #[serde(flatten)]
    pub patch: ElementPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementList {
    pub elements: Vec<Element>,
    pub total: i64,
}

/// Filters and paging for element listings.
#[derive(Debug, Clone, Default)]
pub struct ElementFilter {
    pub layer_id: Option<i64>,
    pub element_type: Option<ElementType>,
    pub skip: i64,
    pub limit: i64,
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_layer_color() -> String {
    "#000000".to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}
