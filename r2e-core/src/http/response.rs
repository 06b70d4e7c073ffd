//! Response-side re-exports.
//!
//! `axum` already gives us everything we need here; this module exists so
//! the rest of the crate can write `crate::http::response::{...}` the same
//! way it writes `crate::http::extract::{...}`, independent of which axum
//! version is pinned in the workspace.

pub use axum::response::{Html, IntoResponse, Redirect, Response};
pub use axum::response::sse::{Event as SseEvent, KeepAlive as SseKeepAlive, Sse};
