//! Error types for the streaming decoder.
//!
//! Every failure that can settle a pending request maps onto one
//! [`StreamError`] variant, classified by [`ErrorKind`].

mod categories;
mod error;

pub use categories::{ApiErrorBody, ErrorKind};
pub(crate) use categories::value_to_code;
pub use error::{StreamError, StreamResult};
