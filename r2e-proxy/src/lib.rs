//! Upstream dispatch for AEX: builds chat/responses/embeddings bodies,
//! sends them (or a streaming variant) to the routed provider, and
//! settles the reservation the admission controller already opened.

pub mod body;
pub mod dispatch;
pub mod error;
pub mod stream;
pub mod usage;

pub use body::{build_upstream_body, rewrite_response_model};
pub use dispatch::{dispatch_non_streaming, DispatchOutcome};
pub use error::ProxyError;
pub use stream::{dispatch_streaming, ByteStream};
pub use usage::{actual_cost_micro, parse_usage, Usage};
