pub mod interceptors;
pub use interceptors::{LogLevel, cached, invalidate_group, log_at_level, logged, timed};

pub mod prelude {
    //! Re-exports of the most commonly used logging/caching helpers.
    pub use crate::interceptors::{LogLevel, cached, invalidate_group, logged, timed};
}
