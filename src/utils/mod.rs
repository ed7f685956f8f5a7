//! Utility functions: UUID generation, timestamp handling, and bounded
//! retry with backoff.

pub mod backoff;
pub mod timestamps;
mod uuid_utils;

pub use backoff::retry_with_backoff;
pub use timestamps::{iso_timestamp, now_utc, parse_timestamp, Timestamp, TimestampError};
pub use uuid_utils::generate_uuid;
