use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handlers;
pub mod model;
pub mod password;
pub mod service;
pub mod store;
pub mod validator;

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
