//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;

pub use handlers::{API_KEY_HEADER, ApiDoc};
pub use router::create_router;
