//! HTTP protocol layer module
//!
//! Provides HTTP protocol-related base functionality, decoupled from the
//! storage actions: body adapters, query parsing and response builders.

pub mod body;
pub mod query;
pub mod response;

// Re-export commonly used types
pub use body::ResponseBody;
pub use query::QueryParams;
pub use response::{
    build_405_response, build_413_response, build_500_response, empty_response, json_response,
    text_response,
};
