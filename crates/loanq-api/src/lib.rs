//! HTTP surface for loan portfolio questions.
//!
//! `POST /query` answers a question in the session named by the
//! `x-session-id` header, `GET`/`DELETE /memory` read and reset that
//! session's conversation, and `/health` and `/schema` describe the service.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
