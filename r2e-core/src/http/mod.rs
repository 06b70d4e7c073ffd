pub mod extract;
pub mod header;
pub mod response;

pub use axum::{serve, Extension, Json, Router};
pub use axum::body::Body;
pub use axum::http::Uri;
pub use bytes::Bytes;
pub use self::extract::{
    ConnectInfo, DefaultBodyLimit, Form, FromRef, FromRequest, FromRequestParts,
    MatchedPath, OriginalUri, Path, Query, Request, State,
};
pub use self::header::{
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    // Common header constants
    ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST,
    LOCATION, ORIGIN, REFERER, SET_COOKIE, USER_AGENT,
};
pub use self::response::{Html, IntoResponse, Redirect, Response, Sse, SseEvent, SseKeepAlive};
