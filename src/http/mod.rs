//! HTTP protocol layer module
//!
//! Provides HTTP protocol-related base functionality, decoupled from
//! path resolution and file loading.

pub mod cache;
pub mod mime;
pub mod range;
pub mod response;

// Re-export commonly used types
pub use range::parse_range_header;
pub use response::{
    build_304_response, build_403_response, build_404_response, build_416_response,
    build_500_response, build_dir_redirect_response, build_html_response,
};
