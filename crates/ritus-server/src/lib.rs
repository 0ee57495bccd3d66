pub mod handlers;

pub use handlers::{ApiError, AppState, router};
