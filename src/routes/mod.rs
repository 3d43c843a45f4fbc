//! axum adapter: registered endpoints on one generic handler, plus common service routes.

mod api;
mod common;

pub use api::{api_routes, DEFAULT_BODY_LIMIT};
pub use common::common_routes;
