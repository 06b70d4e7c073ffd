//! Extractor re-exports plus `RawPathParams`, a small owned view over the
//! matched route's path parameters. `axum` keeps its own `RawPathParams`
//! private, so `guards.rs` needs a stand-in with the same zero-fuss
//! "extraction never fails" contract.

pub use axum::extract::{
    ConnectInfo, DefaultBodyLimit, Form, FromRef, FromRequest, FromRequestParts, MatchedPath,
    OriginalUri, Path, Query, Request, State,
};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::convert::Infallible;

/// Owned view over the path parameters matched for the current route.
///
/// Extraction never fails, even for a route with no dynamic segments — an
/// unmatched route simply yields an empty parameter set.
#[derive(Clone, Debug, Default)]
pub struct RawPathParams(Vec<(String, String)>);

impl RawPathParams {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<S> FromRequestParts<S> for RawPathParams
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let params = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map(|Path(map)| map.into_iter().collect())
            .unwrap_or_default();
        Ok(RawPathParams(params))
    }
}
