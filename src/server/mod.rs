//! HTTP backend: accounts, drawing projects and the command endpoint.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  HTTP  ┌────────────────────────────────────────────────┐
//! │  Client  │ ─────> │  server.rs  (router, CORS, tracing, startup)   │
//! │  (SPA)   │ <───── │    └─ api.rs  (handlers, AppState, ApiError)   │
//! └──────────┘        │         │                                      │
//!                     │         │ CurrentUser extractor               │
//!                     │         v                                      │
//!                     │  auth.rs  (argon2 hashes, bearer tokens)       │
//!                     │         │                                      │
//!                     │         │ DbHandle::call()                     │
//!                     │         v                                      │
//!                     │  db.rs    (SQLite store, ownership checks)     │
//!                     └────────────────────────────────────────────────┘
//! ```
//!
//! `POST {prefix}/nlp/process` checks that the caller owns the target
//! project, then hands the text to [`crate::interpreter::Interpreter`].
//! Interpretation never touches the store.
//!
//! | Module   | Responsibility                                               |
//! |----------|--------------------------------------------------------------|
//! | `models` | `User`, `Project`, `ProjectSettings`, `Layer`, `Element`     |
//! | `db`     | `CadDb` migrations and queries; `DbHandle` for async callers |

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;
