//! Scenestream-Common: shared identifiers and error types.
//!
//! - **Typed IDs**: [`SessionId`], [`SceneId`] and [`UserId`] so a scene
//!   identifier can never be passed where a session identifier is expected.
//! - **Error Handling**: the unified [`Error`] enum and its [`Result`] alias,
//!   with an HTTP status mapping for the server layer.
//!
//! # Examples
//!
//! ```
//! use scenestream_common::{Error, Result, SessionId};
//!
//! fn lookup(id: SessionId) -> Result<()> {
//!     Err(Error::not_found("session", id))
//! }
//!
//! assert_eq!(lookup(SessionId::new()).unwrap_err().http_status(), 404);
//! ```

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::*;
