use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::errors::CadError;
use crate::geometry::{ElementType, Geometry};

/// Async-safe handle to the store.
///
/// Wraps `CadDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<CadDb>>,
}

impl DbHandle {
    pub fn new(db: CadDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CadDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| CadError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, CadDb>> {
        self.inner
            .lock()
            .map_err(|_| CadError::LockPoisoned.into())
    }
}

pub struct CadDb {
    conn: Connection,
}

const USER_COLUMNS: &str = "id, username, email, is_active, is_superuser, created_at";
const PROJECT_COLUMNS: &str = "id, name, description, user_id, created_at, updated_at";
const LAYER_COLUMNS: &str = "id, project_id, name, visible, locked, color, layer_order";
const ELEMENT_COLUMNS: &str = "id, project_id, layer_id, element_type, geometry, style, selected, locked, metadata, created_at, updated_at";

impl CadDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL UNIQUE,
                    hashed_password TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    is_superuser INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS access_tokens (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_settings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL UNIQUE REFERENCES projects(id) ON DELETE CASCADE,
                    unit_system TEXT NOT NULL DEFAULT 'metric',
                    grid_spacing REAL NOT NULL DEFAULT 1.0,
                    grid_subdivisions INTEGER NOT NULL DEFAULT 10,
                    grid_visible INTEGER NOT NULL DEFAULT 1,
                    axes_visible INTEGER NOT NULL DEFAULT 1,
                    snap_to_grid INTEGER NOT NULL DEFAULT 1,
                    ui_theme TEXT NOT NULL DEFAULT 'light',
                    grid_color TEXT NOT NULL DEFAULT '#CCCCCC',
                    background_color TEXT NOT NULL DEFAULT '#FFFFFF',
                    advanced_settings TEXT NOT NULL DEFAULT '{}'
                );

                CREATE TABLE IF NOT EXISTS layers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    visible INTEGER NOT NULL DEFAULT 1,
                    locked INTEGER NOT NULL DEFAULT 0,
                    color TEXT NOT NULL DEFAULT '#000000',
                    layer_order INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS elements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    layer_id INTEGER NOT NULL REFERENCES layers(id) ON DELETE CASCADE,
                    element_type TEXT NOT NULL,
                    geometry TEXT NOT NULL,
                    style TEXT NOT NULL,
                    selected INTEGER NOT NULL DEFAULT 0,
                    locked INTEGER NOT NULL DEFAULT 0,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_access_tokens_user ON access_tokens(user_id);
                CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id);
                CREATE INDEX IF NOT EXISTS idx_layers_project ON layers(project_id);
                CREATE INDEX IF NOT EXISTS idx_elements_project ON elements(project_id);
                CREATE INDEX IF NOT EXISTS idx_elements_layer ON elements(layer_id);
                CREATE INDEX IF NOT EXISTS idx_elements_type ON elements(project_id, element_type);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn count_users(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")
    }

    /// Insert a user; fails with `UserAlreadyExists` if the email or the
    /// username is taken.
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
        is_superuser: bool,
    ) -> Result<User> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1 OR username = ?2",
                params![email, username],
                |row| row.get(0),
            )
            .context("Failed to check for existing user")?;
        if exists {
            return Err(CadError::UserAlreadyExists.into());
        }

        self.conn
            .execute(
                "INSERT INTO users (username, email, hashed_password, is_superuser) VALUES (?1, ?2, ?3, ?4)",
                params![username, email, hashed_password, is_superuser],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
                map_user,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY id LIMIT ?1 OFFSET ?2",
                USER_COLUMNS
            ))
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map(params![limit, skip], map_user)
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?);
        }
        Ok(users)
    }

    /// Look a user up by username first, then by email.
    pub fn find_credentials(&self, login: &str) -> Result<Option<UserCredentials>> {
        let by = |column: &str| -> Result<Option<UserCredentials>> {
            self.conn
                .query_row(
                    &format!(
                        "SELECT {}, hashed_password FROM users WHERE {} = ?1",
                        USER_COLUMNS, column
                    ),
                    params![login],
                    |row| {
                        Ok(UserCredentials {
                            user: map_user(row)?,
                            hashed_password: row.get(6)?,
                        })
                    },
                )
                .optional()
                .context("Failed to query user credentials")
        };
        match by("username")? {
            Some(found) => Ok(Some(found)),
            None => by("email"),
        }
    }

    pub fn set_user_active(&self, id: i64, is_active: bool) -> Result<Option<User>> {
        self.conn
            .execute(
                "UPDATE users SET is_active = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![is_active, id],
            )
            .context("Failed to update user")?;
        self.get_user(id)
    }

    // ── Access tokens ─────────────────────────────────────────────────

    /// `expires_at` uses SQLite's `YYYY-MM-DD HH:MM:SS` UTC format so it
    /// compares directly against `datetime('now')`.
    pub fn insert_access_token(&self, token_hash: &str, user_id: i64, expires_at: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO access_tokens (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token_hash, user_id, expires_at],
            )
            .context("Failed to insert access token")?;
        Ok(())
    }

    /// The user owning an unexpired token.
    pub fn user_for_token(&self, token_hash: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT u.id, u.username, u.email, u.is_active, u.is_superuser, u.created_at
                 FROM access_tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.token_hash = ?1 AND t.expires_at > datetime('now')",
                params![token_hash],
                map_user,
            )
            .optional()
            .context("Failed to query access token")
    }

    pub fn delete_expired_tokens(&self) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM access_tokens WHERE expires_at <= datetime('now')",
                [],
            )
            .context("Failed to purge expired tokens")
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Create a project together with its default settings.
    pub fn create_project(&self, user_id: i64, name: &str, description: Option<&str>) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let project = self.insert_project(user_id, name, description)?;
        tx.commit().context("Failed to commit project")?;
        Ok(project)
    }

    fn insert_project(&self, user_id: i64, name: &str, description: Option<&str>) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (user_id, name, description) VALUES (?1, ?2, ?3)",
                params![user_id, name, description],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO project_settings (project_id) VALUES (?1)",
                params![id],
            )
            .context("Failed to insert default project settings")?;
        self.get_project(user_id, id)?
            .context("Project not found after insert")
    }

    pub fn list_projects(&self, user_id: i64, skip: i64, limit: i64) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM projects WHERE user_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
                PROJECT_COLUMNS
            ))
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(params![user_id, limit, skip], map_project)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    /// A project, only if `user_id` owns it.
    pub fn get_project(&self, user_id: i64, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM projects WHERE id = ?1 AND user_id = ?2",
                    PROJECT_COLUMNS
                ),
                params![id, user_id],
                map_project,
            )
            .optional()
            .context("Failed to query project")
    }

    /// Like `get_project`, but a missing or foreign project is a `ProjectNotFound` error.
    pub fn require_project(&self, user_id: i64, id: i64) -> Result<Project> {
        self.get_project(user_id, id)?
            .ok_or_else(|| CadError::ProjectNotFound { id }.into())
    }

    pub fn get_project_with_settings(&self, user_id: i64, id: i64) -> Result<Option<ProjectWithSettings>> {
        let project = match self.get_project(user_id, id)? {
            Some(p) => p,
            None => return Ok(None),
        };
        let settings = self.get_settings(id)?;
        Ok(Some(ProjectWithSettings { project, settings }))
    }

    pub fn update_project(
        &self,
        user_id: i64,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let current = self.require_project(user_id, id)?;
        let name = name.unwrap_or(&current.name);
        let description = description.or(current.description.as_deref());
        self.conn
            .execute(
                "UPDATE projects SET name = ?1, description = ?2, updated_at = datetime('now') WHERE id = ?3",
                params![name, description, id],
            )
            .context("Failed to update project")?;
        self.require_project(user_id, id)
    }

    pub fn delete_project(&self, user_id: i64, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM projects WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    // ── Project settings ──────────────────────────────────────────────

    pub fn get_settings(&self, project_id: i64) -> Result<Option<ProjectSettings>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_id, unit_system, grid_spacing, grid_subdivisions, grid_visible, axes_visible, snap_to_grid, ui_theme, grid_color, background_color, advanced_settings
                 FROM project_settings WHERE project_id = ?1",
                params![project_id],
                |row| {
                    Ok(SettingsRow {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        unit_system: row.get(2)?,
                        grid_spacing: row.get(3)?,
                        grid_subdivisions: row.get(4)?,
                        grid_visible: row.get(5)?,
                        axes_visible: row.get(6)?,
                        snap_to_grid: row.get(7)?,
                        ui_theme: row.get(8)?,
                        grid_color: row.get(9)?,
                        background_color: row.get(10)?,
                        advanced_settings: row.get(11)?,
                    })
                },
            )
            .optional()
            .context("Failed to query project settings")?;
        row.map(SettingsRow::into_settings).transpose()
    }

    pub fn update_settings(
        &self,
        user_id: i64,
        project_id: i64,
        patch: &ProjectSettingsPatch,
    ) -> Result<ProjectSettings> {
        self.require_project(user_id, project_id)?;
        let current = self
            .get_settings(project_id)?
            .ok_or(CadError::SettingsNotFound { project_id })?;

        let unit_system = patch.unit_system.unwrap_or(current.unit_system);
        let ui_theme = patch.ui_theme.unwrap_or(current.ui_theme);
        let advanced = patch
            .advanced_settings
            .as_ref()
            .unwrap_or(&current.advanced_settings);
        let advanced = serde_json::to_string(advanced).context("Failed to encode advanced settings")?;

        self.conn
            .execute(
                "UPDATE project_settings SET unit_system = ?1, grid_spacing = ?2, grid_subdivisions = ?3,
                     grid_visible = ?4, axes_visible = ?5, snap_to_grid = ?6, ui_theme = ?7,
                     grid_color = ?8, background_color = ?9, advanced_settings = ?10
                 WHERE project_id = ?11",
                params![
                    unit_system.as_str(),
                    patch.grid_spacing.unwrap_or(current.grid_spacing),
                    patch.grid_subdivisions.unwrap_or(current.grid_subdivisions),
                    patch.grid_visible.unwrap_or(current.grid_visible),
                    patch.axes_visible.unwrap_or(current.axes_visible),
                    patch.snap_to_grid.unwrap_or(current.snap_to_grid),
                    ui_theme.as_str(),
                    patch.grid_color.as_deref().unwrap_or(&current.grid_color),
                    patch.background_color.as_deref().unwrap_or(&current.background_color),
                    advanced,
                    project_id,
                ],
            )
            .context("Failed to update project settings")?;
        self.get_settings(project_id)?
            .context("Project settings not found after update")
    }

    // ── Layers ────────────────────────────────────────────────────────

    pub fn create_layer(&self, user_id: i64, layer: &NewLayer) -> Result<Layer> {
        self.require_project(user_id, layer.project_id)?;
        self.insert_layer(layer)
    }

    fn insert_layer(&self, layer: &NewLayer) -> Result<Layer> {
        self.conn
            .execute(
                "INSERT INTO layers (project_id, name, visible, locked, color, layer_order) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    layer.project_id,
                    layer.name,
                    layer.visible,
                    layer.locked,
                    layer.color,
                    layer.order
                ],
            )
            .context("Failed to insert layer")?;
        let id = self.conn.last_insert_rowid();
        self.layer_by_id(id)?.context("Layer not found after insert")
    }

    /// Layers of an owned project ordered by render order; `total` counts
    /// all of them regardless of paging.
    pub fn list_layers(&self, user_id: i64, project_id: i64, skip: i64, limit: i64) -> Result<LayerList> {
        self.require_project(user_id, project_id)?;
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM layers WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count layers")?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM layers WHERE project_id = ?1 ORDER BY layer_order, id LIMIT ?2 OFFSET ?3",
                LAYER_COLUMNS
            ))
            .context("Failed to prepare list_layers")?;
        let rows = stmt
            .query_map(params![project_id, limit, skip], map_layer)
            .context("Failed to query layers")?;
        let mut layers = Vec::new();
        for row in rows {
            layers.push(row.context("Failed to read layer row")?);
        }
        Ok(LayerList { layers, total })
    }

    fn layer_by_id(&self, id: i64) -> Result<Option<Layer>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM layers WHERE id = ?1", LAYER_COLUMNS),
                params![id],
                map_layer,
            )
            .optional()
            .context("Failed to query layer")
    }

    /// A layer, only if its project belongs to `user_id`.
    pub fn get_layer(&self, user_id: i64, id: i64) -> Result<Option<Layer>> {
        match self.layer_by_id(id)? {
            Some(layer) if self.get_project(user_id, layer.project_id)?.is_some() => Ok(Some(layer)),
            _ => Ok(None),
        }
    }

    pub fn update_layer(&self, user_id: i64, id: i64, patch: &LayerPatch) -> Result<Layer> {
        let current = self
            .get_layer(user_id, id)?
            .ok_or(CadError::LayerNotFound { id })?;
        self.conn
            .execute(
                "UPDATE layers SET name = ?1, visible = ?2, locked = ?3, color = ?4, layer_order = ?5 WHERE id = ?6",
                params![
                    patch.name.as_deref().unwrap_or(&current.name),
                    patch.visible.unwrap_or(current.visible),
                    patch.locked.unwrap_or(current.locked),
                    patch.color.as_deref().unwrap_or(&current.color),
                    patch.order.unwrap_or(current.order),
                    id
                ],
            )
            .context("Failed to update layer")?;
        self.layer_by_id(id)?.context("Layer not found after update")
    }

    pub fn delete_layer(&self, user_id: i64, id: i64) -> Result<bool> {
        if self.get_layer(user_id, id)?.is_none() {
            return Ok(false);
        }
        let count = self
            .conn
            .execute("DELETE FROM layers WHERE id = ?1", params![id])
            .context("Failed to delete layer")?;
        Ok(count > 0)
    }

    // ── Elements ──────────────────────────────────────────────────────

    pub fn create_element(&self, user_id: i64, element: &NewElement) -> Result<Element> {
        self.insert_element(user_id, element)
    }

    /// Create several elements atomically: any failure rolls all of them back.
    pub fn create_elements(&self, user_id: i64, elements: &[NewElement]) -> Result<Vec<Element>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut created = Vec::with_capacity(elements.len());
        for element in elements {
            created.push(self.insert_element(user_id, element)?);
        }
        tx.commit().context("Failed to commit bulk element insert")?;
        Ok(created)
    }

    fn insert_element(&self, user_id: i64, element: &NewElement) -> Result<Element> {
        self.require_project(user_id, element.project_id)?;
        self.require_layer_in_project(element.layer_id, element.project_id)?;
        Geometry::parse(element.element_type, &element.geometry)?;

        self.conn
            .execute(
                "INSERT INTO elements (project_id, layer_id, element_type, geometry, style, selected, locked, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    element.project_id,
                    element.layer_id,
                    element.element_type.as_str(),
                    serde_json::to_string(&element.geometry).context("Failed to encode geometry")?,
                    serde_json::to_string(&element.style).context("Failed to encode style")?,
                    element.selected,
                    element.locked,
                    serde_json::to_string(&element.metadata).context("Failed to encode metadata")?,
                ],
            )
            .context("Failed to insert element")?;
        let id = self.conn.last_insert_rowid();
        self.element_by_id(id)?.context("Element not found after insert")
    }

    fn require_layer_in_project(&self, layer_id: i64, project_id: i64) -> Result<()> {
        match self.layer_by_id(layer_id)? {
            Some(layer) if layer.project_id == project_id => Ok(()),
            _ => Err(CadError::LayerNotFound { id: layer_id }.into()),
        }
    }

    /// Elements of an owned project matching `filter`; `total` counts the
    /// filtered set before paging.
    pub fn list_elements(&self, user_id: i64, project_id: i64, filter: &ElementFilter) -> Result<ElementList> {
        self.require_project(user_id, project_id)?;
        let element_type = filter.element_type.map(|t| t.as_str());

        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM elements
                 WHERE project_id = ?1 AND (?2 IS NULL OR layer_id = ?2) AND (?3 IS NULL OR element_type = ?3)",
                params![project_id, filter.layer_id, element_type],
                |row| row.get(0),
            )
            .context("Failed to count elements")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM elements
                 WHERE project_id = ?1 AND (?2 IS NULL OR layer_id = ?2) AND (?3 IS NULL OR element_type = ?3)
                 ORDER BY id LIMIT ?4 OFFSET ?5",
                ELEMENT_COLUMNS
            ))
            .context("Failed to prepare list_elements")?;
        let rows = stmt
            .query_map(
                params![project_id, filter.layer_id, element_type, filter.limit, filter.skip],
                map_element_row,
            )
            .context("Failed to query elements")?;
        let mut elements = Vec::new();
        for row in rows {
            let r = row.context("Failed to read element row")?;
            elements.push(r.into_element()?);
        }
        Ok(ElementList { elements, total })
    }

    fn element_by_id(&self, id: i64) -> Result<Option<Element>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM elements WHERE id = ?1", ELEMENT_COLUMNS),
                params![id],
                map_element_row,
            )
            .optional()
            .context("Failed to query element")?;
        row.map(ElementRow::into_element).transpose()
    }

    /// An element, only if its project belongs to `user_id`.
    pub fn get_element(&self, user_id: i64, id: i64) -> Result<Option<Element>> {
        match self.element_by_id(id)? {
            Some(element) if self.get_project(user_id, element.project_id)?.is_some() => {
                Ok(Some(element))
            }
            _ => Ok(None),
        }
    }

    pub fn update_element(&self, user_id: i64, id: i64, patch: &ElementPatch) -> Result<Element> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let element = self.apply_element_patch(user_id, id, patch)?;
        tx.commit().context("Failed to commit element update")?;
        Ok(element)
    }

    /// Apply several patches atomically.
    pub fn update_elements(&self, user_id: i64, patches: &[ElementPatchWithId]) -> Result<Vec<Element>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut updated = Vec::with_capacity(patches.len());
        for p in patches {
            updated.push(self.apply_element_patch(user_id, p.id, &p.patch)?);
        }
        tx.commit().context("Failed to commit bulk element update")?;
        Ok(updated)
    }

    fn apply_element_patch(&self, user_id: i64, id: i64, patch: &ElementPatch) -> Result<Element> {
        let current = self
            .get_element(user_id, id)?
            .ok_or(CadError::ElementNotFound { id })?;

        let element_type = patch.element_type.unwrap_or(current.element_type);
        let geometry = patch.geometry.as_ref().unwrap_or(&current.geometry);
        if patch.element_type.is_some() || patch.geometry.is_some() {
            Geometry::parse(element_type, geometry)?;
        }
        let layer_id = patch.layer_id.unwrap_or(current.layer_id);
        if layer_id != current.layer_id {
            self.require_layer_in_project(layer_id, current.project_id)?;
        }
        let style = patch.style.as_ref().unwrap_or(&current.style);
        let metadata = patch.metadata.as_ref().unwrap_or(&current.metadata);

        self.conn
            .execute(
                "UPDATE elements SET layer_id = ?1, element_type = ?2, geometry = ?3, style = ?4,
                     selected = ?5, locked = ?6, metadata = ?7, updated_at = datetime('now')
                 WHERE id = ?8",
                params![
                    layer_id,
                    element_type.as_str(),
                    serde_json::to_string(geometry).context("Failed to encode geometry")?,
                    serde_json::to_string(style).context("Failed to encode style")?,
                    patch.selected.unwrap_or(current.selected),
                    patch.locked.unwrap_or(current.locked),
                    serde_json::to_string(metadata).context("Failed to encode metadata")?,
                    id,
                ],
            )
            .context("Failed to update element")?;
        self.element_by_id(id)?.context("Element not found after update")
    }

    pub fn delete_element(&self, user_id: i64, id: i64) -> Result<bool> {
        if self.get_element(user_id, id)?.is_none() {
            return Ok(false);
        }
        let count = self
            .conn
            .execute("DELETE FROM elements WHERE id = ?1", params![id])
            .context("Failed to delete element")?;
        Ok(count > 0)
    }

    /// Delete the listed elements the user owns; ids that are missing or
    /// foreign are skipped. Returns how many rows were removed.
    pub fn delete_elements(&self, user_id: i64, ids: &[i64]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut deleted = 0;
        for id in ids {
            if self.delete_element(user_id, *id)? {
                deleted += 1;
            }
        }
        tx.commit().context("Failed to commit bulk element delete")?;
        Ok(deleted)
    }

    // ── Seeding ───────────────────────────────────────────────────────

    /// On an empty database, create the `admin` superuser with a default
    /// project and layer. Returns whether anything was created.
    pub fn seed_defaults(&self, admin_password_hash: &str) -> Result<bool> {
        if self.count_users()? > 0 {
            return Ok(false);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let admin = self.create_user("admin", "admin@example.com", admin_password_hash, true)?;
        let project = self.insert_project(
            admin.id,
            "Default project",
            Some("Initial project created automatically"),
        )?;
        self.insert_layer(&NewLayer {
            project_id: project.id,
            name: "Default".to_string(),
            visible: true,
            locked: false,
            color: default_layer_color(),
            order: 0,
        })?;
        tx.commit().context("Failed to commit default data")?;
        Ok(true)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_active: row.get(3)?,
        is_superuser: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        user_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_layer(row: &Row<'_>) -> rusqlite::Result<Layer> {
    Ok(Layer {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        visible: row.get(3)?,
        locked: row.get(4)?,
        color: row.get(5)?,
        order: row.get(6)?,
    })
}

fn map_element_row(row: &Row<'_>) -> rusqlite::Result<ElementRow> {
    Ok(ElementRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        layer_id: row.get(2)?,
        element_type: row.get(3)?,
        geometry: row.get(4)?,
        style: row.get(5)?,
        selected: row.get(6)?,
        locked: row.get(7)?,
        metadata: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Intermediate row struct for elements before the type string and JSON
/// columns are decoded.
struct ElementRow {
    id: i64,
    project_id: i64,
    layer_id: i64,
    element_type: String,
    geometry: String,
    style: String,
    selected: bool,
    locked: bool,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl ElementRow {
    fn into_element(self) -> Result<Element> {
        let element_type = ElementType::from_str(&self.element_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse element type")?;
        Ok(Element {
            id: self.id,
            project_id: self.project_id,
            layer_id: self.layer_id,
            element_type,
            geometry: serde_json::from_str(&self.geometry).context("Failed to parse element geometry JSON")?,
            style: serde_json::from_str(&self.style).context("Failed to parse element style JSON")?,
            selected: self.selected,
            locked: self.locked,
            metadata: serde_json::from_str(&self.metadata).context("Failed to parse element metadata JSON")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Intermediate row struct for project settings.
struct SettingsRow {
    id: i64,
    project_id: i64,
    unit_system: String,
    grid_spacing: f64,
    grid_subdivisions: i32,
    grid_visible: bool,
    axes_visible: bool,
    snap_to_grid: bool,
    ui_theme: String,
    grid_color: String,
    background_color: String,
    advanced_settings: String,
}

impl SettingsRow {
    fn into_settings(self) -> Result<ProjectSettings> {
        let unit_system = UnitSystem::from_str(&self.unit_system)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse unit system")?;
        let ui_theme = UiTheme::from_str(&self.ui_theme)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse UI theme")?;
        Ok(ProjectSettings {
            id: self.id,
            project_id: self.project_id,
            unit_system,
            grid_spacing: self.grid_spacing,
            grid_subdivisions: self.grid_subdivisions,
            grid_visible: self.grid_visible,
            axes_visible: self.axes_visible,
            snap_to_grid: self.snap_to_grid,
            ui_theme,
            grid_color: self.grid_color,
            background_color: self.background_color,
            advanced_settings: serde_json::from_str(&self.advanced_settings)
                .context("Failed to parse advanced settings JSON")?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
