//! CLI command implementations.
//!
//! | Module      | Commands handled        |
//! |-------------|-------------------------|
//! | `serve`     | `Serve`, `InitDb`       |
//! | `interpret` | `Interpret`             |
//! | `config`    | `Config`                |

pub mod config;
pub mod interpret;
pub mod serve;

pub use config::cmd_config;
pub use interpret::cmd_interpret;
pub use serve::{cmd_init_db, cmd_serve};
