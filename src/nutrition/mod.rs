pub mod dto;
pub mod errors;
pub mod extractor;
pub mod handlers;
pub mod parser;
pub mod services;
pub mod validator;

use crate::state::AppState;
use axum::Router;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new().merge(handlers::macro_routes(max_upload_bytes))
}
