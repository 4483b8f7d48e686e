//! `X-Client-Id` extractor for locality-biased routing. Read per-route
//! (as an extractor), not applied as ambient middleware — only the
//! handlers that actually route a request need it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

pub struct ClientIdHeader(pub Option<String>);

impl<S> FromRequestParts<S> for ClientIdHeader
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get("x-client-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Self(value))
    }
}
