//! Extract the calling actor from request headers (`X-Actor-ID`, `X-Actor-Roles`).

use crate::context::Actor;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

pub const ACTOR_ID_HEADER: &str = "X-Actor-ID";
/// Comma-separated role names.
pub const ACTOR_ROLES_HEADER: &str = "X-Actor-Roles";

/// The actor named by the headers; `None` for anonymous requests.
#[derive(Clone, Debug)]
pub struct CurrentActor(pub Option<Actor>);

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(id) = header(&parts.headers, ACTOR_ID_HEADER) else {
            return Ok(CurrentActor(None));
        };
        let mut actor = Actor::new(id);
        if let Some(roles) = header(&parts.headers, ACTOR_ROLES_HEADER) {
            for role in roles.split(',').map(str::trim).filter(|r| !r.is_empty()) {
                actor = actor.with_role(role);
            }
        }
        Ok(CurrentActor(Some(actor)))
    }
}
