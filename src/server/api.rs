use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use super::auth::{self, CurrentUser};
use super::db::DbHandle;
#[cfg(test)]
use super::db::CadDb;
use super::models::{
    ElementFilter, ElementPatch, ElementPatchWithId, LayerPatch, NewElement, NewLayer,
    ProjectSettingsPatch,
};
use crate::config::Settings;
use crate::errors::CadError;
use crate::geometry::ElementType;
use crate::interpreter::{CommandRequest, Interpreter};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub interpreter: Interpreter,
    pub settings: Settings,
}

pub type SharedState = Arc<AppState>;

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Deserialize)]
pub struct LayerQuery {
    pub project_id: i64,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Deserialize)]
pub struct ElementQuery {
    pub project_id: i64,
    pub layer_id: Option<i64>,
    pub element_type: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Deserialize)]
pub struct BulkCreateRequest {
    pub elements: Vec<NewElement>,
}

#[derive(Deserialize)]
pub struct BulkUpdateRequest {
    pub elements: Vec<ElementPatchWithId>,
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<i64>,
}

#[derive(Serialize)]
pub struct BulkDeleteResult {
    pub deleted: usize,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// Clamp client paging into `(skip >= 0, 0 <= limit <= MAX_PAGE_SIZE)`.
fn page(skip: i64, limit: i64) -> (i64, i64) {
    (skip.max(0), limit.clamp(0, MAX_PAGE_SIZE))
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => {
                let body = Json(serde_json::json!({"error": msg}));
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    body,
                )
                    .into_response();
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<CadError> for ApiError {
    fn from(err: CadError) -> Self {
        let message = err.to_string();
        match err {
            e if e.is_not_found() => ApiError::NotFound(message),
            CadError::UserAlreadyExists
            | CadError::InvalidGeometry { .. }
            | CadError::BadRequest(_) => ApiError::BadRequest(message),
            CadError::InvalidCredentials | CadError::InactiveUser | CadError::Unauthorized => {
                ApiError::Unauthorized(message)
            }
            CadError::Forbidden => ApiError::Forbidden(message),
            _ => {
                tracing::error!(error = %message, "Internal error");
                ApiError::Internal(message)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CadError>() {
            Ok(cad) => cad.into(),
            Err(other) => {
                let message = format!("{:#}", other);
                tracing::error!(error = %message, "Internal error");
                ApiError::Internal(message)
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// Routes mounted under the configured API prefix.
pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/access-token", post(login))
        .route("/users", get(list_users))
        .route("/users/me", get(read_me))
        .route("/users/{id}", patch(update_user))
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route(
            "/projects/{id}/settings",
            get(get_settings).patch(update_settings),
        )
        .route("/layers", get(list_layers).post(create_layer))
        .route("/layers/{id}", patch(update_layer).delete(delete_layer))
        .route("/elements", get(list_elements).post(create_element))
        .route("/elements/bulk", post(bulk_create_elements).patch(bulk_update_elements))
        .route("/elements/bulk-delete", post(bulk_delete_elements))
        .route(
            "/elements/{id}",
            get(get_element).patch(update_element).delete(delete_element),
        )
        .route("/nlp/process", post(process_command))
}

// ── Handlers: service ─────────────────────────────────────────────────

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({"message": "Welcome to the CAD-NLP API"}))
}

pub async fn health_check() -> &'static str {
    "ok"
}

// ── Handlers: auth and users ──────────────────────────────────────────

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    if req.username.trim().is_empty() {
        return Err(ApiError::BadRequest("Username must not be empty".into()));
    }
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("Password must not be empty".into()));
    }
    let well_formed = match req.email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !well_formed {
        return Err(ApiError::BadRequest(format!("Invalid email address: {}", req.email)));
    }
    Ok(())
}

async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req)?;
    let hashed = auth::hash_password_blocking(req.password).await?;
    let username = req.username.trim().to_string();
    let email = req.email;
    let user = state
        .db
        .call(move |db| db.create_user(&username, &email, &hashed, false))
        .await?;
    tracing::info!(user_id = user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<SharedState>,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth::authenticate(&state.db, form.username, form.password).await?;
    let token = auth::issue_token(
        &state.db,
        user.id,
        state.settings.access_token_expire_minutes,
    )
    .await?;
    tracing::info!(user_id = user.id, "Access token issued");
    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer",
    }))
}

async fn read_me(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(user)
}

async fn list_users(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_superuser()?;
    let (skip, limit) = page(paging.skip, paging.limit);
    let users = state.db.call(move |db| db.list_users(skip, limit)).await?;
    Ok(Json(users))
}

async fn update_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    current.require_superuser()?;
    let user = state
        .db
        .call(move |db| db.set_user_active(id, req.is_active))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;
    tracing::info!(user_id = id, is_active = user.is_active, "User updated");
    Ok(Json(user))
}

// ── Handlers: projects ────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(paging): Query<Paging>,
) -> Result<impl IntoResponse, ApiError> {
    let (skip, limit) = page(paging.skip, paging.limit);
    let projects = state
        .db
        .call(move |db| db.list_projects(user.id, skip, limit))
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name must not be empty".into()));
    }
    let project = state
        .db
        .call(move |db| db.create_project(user.id, &req.name, req.description.as_deref()))
        .await?;
    tracing::info!(user_id = user.id, project_id = project.id, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.get_project_with_settings(user.id, id))
        .await?;
    match project {
        Some(project) => Ok(Json(project)),
        None => Err(CadError::ProjectNotFound { id }.into()),
    }
}

async fn update_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| {
            db.update_project(user.id, id, req.name.as_deref(), req.description.as_deref())
        })
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_project(user.id, id))
        .await?;
    if !deleted {
        return Err(CadError::ProjectNotFound { id }.into());
    }
    tracing::info!(user_id = user.id, project_id = id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state
        .db
        .call(move |db| {
            db.require_project(user.id, project_id)?;
            db.get_settings(project_id)
        })
        .await?
        .ok_or(CadError::SettingsNotFound { project_id })?;
    Ok(Json(settings))
}

async fn update_settings(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
    Json(patch): Json<ProjectSettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state
        .db
        .call(move |db| db.update_settings(user.id, project_id, &patch))
        .await?;
    Ok(Json(settings))
}

// ── Handlers: layers ──────────────────────────────────────────────────

async fn list_layers(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LayerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (skip, limit) = page(query.skip, query.limit);
    let layers = state
        .db
        .call(move |db| db.list_layers(user.id, query.project_id, skip, limit))
        .await?;
    Ok(Json(layers))
}

async fn create_layer(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewLayer>,
) -> Result<impl IntoResponse, ApiError> {
    let layer = state
        .db
        .call(move |db| db.create_layer(user.id, &req))
        .await?;
    tracing::info!(project_id = layer.project_id, layer_id = layer.id, "Layer created");
    Ok((StatusCode::CREATED, Json(layer)))
}

async fn update_layer(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(patch): Json<LayerPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let layer = state
        .db
        .call(move |db| db.update_layer(user.id, id, &patch))
        .await?;
    Ok(Json(layer))
}

async fn delete_layer(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.db.call(move |db| db.delete_layer(user.id, id)).await?;
    if !deleted {
        return Err(CadError::LayerNotFound { id }.into());
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Handlers: elements ────────────────────────────────────────────────

async fn list_elements(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ElementQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let element_type = query
        .element_type
        .as_deref()
        .map(ElementType::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let (skip, limit) = page(query.skip, query.limit);
    let filter = ElementFilter {
        layer_id: query.layer_id,
        element_type,
        skip,
        limit,
    };
    let project_id = query.project_id;
    let elements = state
        .db
        .call(move |db| db.list_elements(user.id, project_id, &filter))
        .await?;
    Ok(Json(elements))
}

async fn create_element(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewElement>,
) -> Result<impl IntoResponse, ApiError> {
    let element = state
        .db
        .call(move |db| db.create_element(user.id, &req))
        .await?;
    tracing::debug!(
        project_id = element.project_id,
        element_id = element.id,
        element_type = %element.element_type,
        "Element created"
    );
    Ok((StatusCode::CREATED, Json(element)))
}

async fn get_element(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let element = state
        .db
        .call(move |db| db.get_element(user.id, id))
        .await?
        .ok_or(CadError::ElementNotFound { id })?;
    Ok(Json(element))
}

async fn update_element(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(patch): Json<ElementPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let element = state
        .db
        .call(move |db| db.update_element(user.id, id, &patch))
        .await?;
    Ok(Json(element))
}

async fn delete_element(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_element(user.id, id))
        .await?;
    if !deleted {
        return Err(CadError::ElementNotFound { id }.into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_create_elements(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<BulkCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let elements = state
        .db
        .call(move |db| db.create_elements(user.id, &req.elements))
        .await?;
    tracing::info!(user_id = user.id, count = elements.len(), "Elements created in bulk");
    Ok((StatusCode::CREATED, Json(elements)))
}

async fn bulk_update_elements(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<BulkUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let elements = state
        .db
        .call(move |db| db.update_elements(user.id, &req.elements))
        .await?;
    Ok(Json(elements))
}

async fn bulk_delete_elements(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_elements(user.id, &req.ids))
        .await?;
    tracing::info!(user_id = user.id, deleted, "Elements deleted in bulk");
    Ok(Json(BulkDeleteResult { deleted }))
}

// ── Handlers: command interpreter ─────────────────────────────────────

async fn process_command(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = req.project_id;
    state
        .db
        .call(move |db| db.require_project(user.id, project_id))
        .await?;

    let response = state.interpreter.process(&req);
    tracing::info!(
        user_id = user.id,
        project_id,
        recognized = response.recognized,
        action = response.action.map(|a| a.as_str()),
        "Command processed"
    );
    Ok(Json(response))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        Arc::new(AppState {
            db: DbHandle::new(CadDb::new_in_memory().unwrap()),
            interpreter: Interpreter::default(),
            settings: Settings::default(),
        })
    }

    fn test_app(state: &SharedState) -> Router {
        api_router().with_state(state.clone())
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Create a user directly in the store and hand back a valid token.
    async fn user_token(state: &SharedState, username: &str, superuser: bool) -> String {
        let username = username.to_string();
        let email = format!("{}@example.com", username);
        let user = state
            .db
            .call(move |db| db.create_user(&username, &email, "unused", superuser))
            .await
            .unwrap();
        auth::issue_token(&state.db, user.id, 60).await.unwrap()
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn create_project(app: &Router, token: &str, name: &str) -> Value {
        let resp = send(app, request("POST", "/projects", Some(token), Some(json!({"name": name})))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp.into_body()).await
    }

    async fn create_layer(app: &Router, token: &str, project_id: i64, name: &str) -> Value {
        let resp = send(
            app,
            request(
                "POST",
                "/layers",
                Some(token),
                Some(json!({"project_id": project_id, "name": name})),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp.into_body()).await
    }

    fn line_element(project_id: i64, layer_id: i64) -> Value {
        json!({
            "project_id": project_id,
            "layer_id": layer_id,
            "type": "line",
            "geometry": {"start": {"x": 0, "y": 0}, "end": {"x": 10, "y": 0}},
            "style": {
                "strokeColor": "#000000",
                "strokeWidth": 1.0,
                "lineType": "solid",
                "fillColor": "#FFFFFF",
                "fillOpacity": 0.0
            }
        })
    }

    // 1. Auth

    #[tokio::test]
    async fn test_register_then_login_with_username_and_email() {
        let state = test_state();
        let app = test_app(&state);

        let resp = send(
            &app,
            request(
                "POST",
                "/auth/register",
                None,
                Some(json!({"email": "ada@example.com", "username": "ada", "password": "pw"})),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let user: Value = body_json(resp.into_body()).await;
        assert_eq!(user["username"], "ada");
        assert!(user.get("hashed_password").is_none());

        for login in ["ada", "ada@example.com"] {
            let req = Request::builder()
                .method("POST")
                .uri("/auth/access-token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(format!("username={}&password=pw", login)))
                .unwrap();
            let resp = send(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let token: Value = body_json(resp.into_body()).await;
            assert_eq!(token["token_type"], "bearer");

            let me = send(&app, request("GET", "/users/me", token["access_token"].as_str(), None)).await;
            assert_eq!(me.status(), StatusCode::OK);
            let me: Value = body_json(me.into_body()).await;
            assert_eq!(me["email"], "ada@example.com");
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_and_invalid() {
        let state = test_state();
        let app = test_app(&state);
        user_token(&state, "ada", false).await;

        let dup = json!({"email": "ada@example.com", "username": "other", "password": "pw"});
        let resp = send(&app, request("POST", "/auth/register", None, Some(dup))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let bad_email = json!({"email": "not-an-email", "username": "bob", "password": "pw"});
        let resp = send(&app, request("POST", "/auth/register", None, Some(bad_email))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let empty_pw = json!({"email": "bob@example.com", "username": "bob", "password": ""});
        let resp = send(&app, request("POST", "/auth/register", None, Some(empty_pw))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_with_wrong_password_is_unauthorized() {
        let state = test_state();
        let app = test_app(&state);
        let hash = auth::hash_password("right").unwrap();
        state
            .db
            .call(move |db| db.create_user("ada", "ada@example.com", &hash, false))
            .await
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/auth/access-token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("username=ada&password=wrong"))
            .unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["error"], "Incorrect username or password");
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let state = test_state();
        let app = test_app(&state);

        let resp = send(&app, request("GET", "/users/me", None, None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let resp = send(&app, request("GET", "/projects", Some("bogus"), None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_deactivated_user_token_stops_working() {
        let state = test_state();
        let app = test_app(&state);
        let admin = user_token(&state, "root", true).await;
        let token = user_token(&state, "ada", false).await;

        let me: Value = body_json(send(&app, request("GET", "/users/me", Some(token.as_str()), None)).await.into_body()).await;
        let id = me["id"].as_i64().unwrap();

        let resp = send(
            &app,
            request("PATCH", &format!("/users/{}", id), Some(admin.as_str()), Some(json!({"is_active": false}))),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(&app, request("GET", "/users/me", Some(token.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_users_requires_superuser() {
        let state = test_state();
        let app = test_app(&state);
        let admin = user_token(&state, "root", true).await;
        let user = user_token(&state, "ada", false).await;

        let resp = send(&app, request("GET", "/users", Some(user.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = send(&app, request("GET", "/users", Some(admin.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let users: Vec<Value> = body_json(resp.into_body()).await;
        assert_eq!(users.len(), 2);
    }

    // 2. Projects and settings

    #[tokio::test]
    async fn test_project_lifecycle() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;

        let project = create_project(&app, &token, "House").await;
        let id = project["id"].as_i64().unwrap();

        let resp = send(&app, request("GET", &format!("/projects/{}", id), Some(token.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let detail: Value = body_json(resp.into_body()).await;
        assert_eq!(detail["name"], "House");
        assert_eq!(detail["settings"]["unit_system"], "metric");

        let resp = send(
            &app,
            request("PATCH", &format!("/projects/{}", id), Some(token.as_str()), Some(json!({"name": "Villa"}))),
        )
        .await;
        let updated: Value = body_json(resp.into_body()).await;
        assert_eq!(updated["name"], "Villa");

        let resp = send(&app, request("GET", "/projects", Some(token.as_str()), None)).await;
        let list: Vec<Value> = body_json(resp.into_body()).await;
        assert_eq!(list.len(), 1);

        let resp = send(&app, request("DELETE", &format!("/projects/{}", id), Some(token.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = send(&app, request("GET", &format!("/projects/{}", id), Some(token.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_project_of_other_user_is_not_found() {
        let state = test_state();
        let app = test_app(&state);
        let ada = user_token(&state, "ada", false).await;
        let bob = user_token(&state, "bob", false).await;
        let project = create_project(&app, &ada, "Ada's").await;
        let id = project["id"].as_i64().unwrap();

        let resp = send(&app, request("GET", &format!("/projects/{}", id), Some(bob.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let resp = send(&app, request("DELETE", &format!("/projects/{}", id), Some(bob.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_settings() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;
        let project = create_project(&app, &token, "House").await;
        let uri = format!("/projects/{}/settings", project["id"]);

        let resp = send(
            &app,
            request("PATCH", &uri, Some(token.as_str()), Some(json!({"ui_theme": "dark", "grid_spacing": 0.25}))),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let settings: Value = body_json(send(&app, request("GET", &uri, Some(token.as_str()), None)).await.into_body()).await;
        assert_eq!(settings["ui_theme"], "dark");
        assert_eq!(settings["grid_spacing"], 0.25);
        assert_eq!(settings["grid_color"], "#CCCCCC");

        let resp = send(
            &app,
            request("PATCH", &uri, Some(token.as_str()), Some(json!({"unit_system": "nautical"}))),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // 3. Layers and elements

    #[tokio::test]
    async fn test_layers_listing_and_update() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;
        let project = create_project(&app, &token, "House").await;
        let pid = project["id"].as_i64().unwrap();
        let layer = create_layer(&app, &token, pid, "Walls").await;
        assert_eq!(layer["visible"], true);
        assert_eq!(layer["color"], "#000000");
        create_layer(&app, &token, pid, "Doors").await;

        let resp = send(&app, request("GET", &format!("/layers?project_id={}&limit=1", pid), Some(token.as_str()), None)).await;
        let list: Value = body_json(resp.into_body()).await;
        assert_eq!(list["total"], 2);
        assert_eq!(list["layers"].as_array().unwrap().len(), 1);

        let resp = send(
            &app,
            request("PATCH", &format!("/layers/{}", layer["id"]), Some(token.as_str()), Some(json!({"visible": false}))),
        )
        .await;
        let updated: Value = body_json(resp.into_body()).await;
        assert_eq!(updated["visible"], false);
        assert_eq!(updated["name"], "Walls");
    }

    #[tokio::test]
    async fn test_element_crud_and_filters() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;
        let pid = create_project(&app, &token, "House").await["id"].as_i64().unwrap();
        let walls = create_layer(&app, &token, pid, "Walls").await["id"].as_i64().unwrap();
        let notes = create_layer(&app, &token, pid, "Notes").await["id"].as_i64().unwrap();

        let resp = send(&app, request("POST", "/elements", Some(token.as_str()), Some(line_element(pid, walls)))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let element: Value = body_json(resp.into_body()).await;
        assert_eq!(element["type"], "line");
        assert_eq!(element["style"]["strokeWidth"], 1.0);

        let mut text = line_element(pid, notes);
        text["type"] = json!("text");
        text["geometry"] = json!({"position": {"x": 1, "y": 1}, "content": "Hall"});
        let resp = send(&app, request("POST", "/elements", Some(token.as_str()), Some(text))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = send(
            &app,
            request("GET", &format!("/elements?project_id={}&element_type=text", pid), Some(token.as_str()), None),
        )
        .await;
        let list: Value = body_json(resp.into_body()).await;
        assert_eq!(list["total"], 1);
        assert_eq!(list["elements"][0]["layer_id"], notes);

        let resp = send(
            &app,
            request("GET", &format!("/elements?project_id={}&layer_id={}", pid, walls), Some(token.as_str()), None),
        )
        .await;
        let list: Value = body_json(resp.into_body()).await;
        assert_eq!(list["total"], 1);

        let uri = format!("/elements/{}", element["id"]);
        let resp = send(&app, request("PATCH", &uri, Some(token.as_str()), Some(json!({"locked": true})))).await;
        let updated: Value = body_json(resp.into_body()).await;
        assert_eq!(updated["locked"], true);

        let resp = send(&app, request("DELETE", &uri, Some(token.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = send(&app, request("GET", &uri, Some(token.as_str()), None)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_element_validation_errors() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;
        let pid = create_project(&app, &token, "House").await["id"].as_i64().unwrap();
        let other = create_project(&app, &token, "Shed").await["id"].as_i64().unwrap();
        let walls = create_layer(&app, &token, pid, "Walls").await["id"].as_i64().unwrap();

        let mut wrong_shape = line_element(pid, walls);
        wrong_shape["type"] = json!("circle");
        let resp = send(&app, request("POST", "/elements", Some(token.as_str()), Some(wrong_shape))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, request("POST", "/elements", Some(token.as_str()), Some(line_element(other, walls)))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(
            &app,
            request("GET", &format!("/elements?project_id={}&element_type=blob", pid), Some(token.as_str()), None),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bulk_element_operations() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;
        let pid = create_project(&app, &token, "House").await["id"].as_i64().unwrap();
        let walls = create_layer(&app, &token, pid, "Walls").await["id"].as_i64().unwrap();

        let body = json!({"elements": [line_element(pid, walls), line_element(pid, walls)]});
        let resp = send(&app, request("POST", "/elements/bulk", Some(token.as_str()), Some(body))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Vec<Value> = body_json(resp.into_body()).await;
        let ids: Vec<i64> = created.iter().map(|e| e["id"].as_i64().unwrap()).collect();

        // One bad entry rolls the whole batch back.
        let body = json!({"elements": [line_element(pid, walls), line_element(pid, 9999)]});
        let resp = send(&app, request("POST", "/elements/bulk", Some(token.as_str()), Some(body))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = json!({"elements": [{"id": ids[0], "selected": true}, {"id": ids[1], "locked": true}]});
        let resp = send(&app, request("PATCH", "/elements/bulk", Some(token.as_str()), Some(body))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let updated: Vec<Value> = body_json(resp.into_body()).await;
        assert_eq!(updated[0]["selected"], true);
        assert_eq!(updated[1]["locked"], true);

        let body = json!({"ids": [ids[0], ids[1], 424242]});
        let resp = send(&app, request("POST", "/elements/bulk-delete", Some(token.as_str()), Some(body))).await;
        let result: Value = body_json(resp.into_body()).await;
        assert_eq!(result["deleted"], 2);

        let resp = send(&app, request("GET", &format!("/elements?project_id={}", pid), Some(token.as_str()), None)).await;
        let list: Value = body_json(resp.into_body()).await;
        assert_eq!(list["total"], 0);
    }

    // 4. Command interpreter

    #[tokio::test]
    async fn test_process_command() {
        let state = test_state();
        let app = test_app(&state);
        let token = user_token(&state, "ada", false).await;
        let pid = create_project(&app, &token, "House").await["id"].as_i64().unwrap();

        let resp = send(
            &app,
            request(
                "POST",
                "/nlp/process",
                Some(token.as_str()),
                Some(json!({"command": "  Crear Línea de 1,1 a 3,3", "project_id": pid})),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["command"], "crear línea de 1,1 a 3,3");
        assert_eq!(body["recognized"], true);
        assert_eq!(body["action"], "create_line");
        assert_eq!(body["params"]["end"]["x"], 3.0);
        assert!(body["error"].is_null());

        let resp = send(
            &app,
            request(
                "POST",
                "/nlp/process",
                Some(token.as_str()),
                Some(json!({"command": "hacer un círculo", "project_id": pid})),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = body_json(resp.into_body()).await;
        assert_eq!(body["recognized"], false);
        assert_eq!(body["error"], "command not recognized");
    }

    #[tokio::test]
    async fn test_process_command_checks_project_ownership() {
        let state = test_state();
        let app = test_app(&state);
        let ada = user_token(&state, "ada", false).await;
        let bob = user_token(&state, "bob", false).await;
        let pid = create_project(&app, &ada, "Ada's").await["id"].as_i64().unwrap();

        let body = json!({"command": "crear línea de 1,1 a 3,3", "project_id": pid});
        let resp = send(&app, request("POST", "/nlp/process", Some(bob.as_str()), Some(body))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // 5. Error mapping

    #[test]
    fn test_api_error_from_anyhow_downcasts() {
        let err: ApiError = anyhow::Error::from(CadError::LayerNotFound { id: 3 }).into();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err: ApiError = anyhow::Error::from(CadError::UserAlreadyExists).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let err: ApiError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn test_page_clamps() {
        assert_eq!(page(-5, 10), (0, 10));
        assert_eq!(page(0, 100_000), (0, MAX_PAGE_SIZE));
        assert_eq!(page(3, -1), (3, 0));
    }
}
