//! Request handler module
//!
//! Maps `/{key}` requests carrying an `action` query parameter onto the
//! storage backend's object and multipart upload operations.

pub mod actions;
pub mod error;
pub mod objects;
pub mod router;

// Re-export main entry point
pub use router::{handle_request, Router};
