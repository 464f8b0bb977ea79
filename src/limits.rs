//! Size and count limits enforced before a request is sent
//!
//! Provides configurable caps for:
//! - URL and header line length
//! - Header, form field and query parameter counts
//! - Request body size (inline data at validation, loaded files at execution)

/// Hard caps checked by validation and by the engine's body preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum URL length in bytes
    pub max_url_bytes: usize,

    /// Maximum number of `-H` headers
    pub max_headers: usize,

    /// Maximum length of one serialized `Name: value` header line
    pub max_header_bytes: usize,

    /// Maximum request body size in bytes
    pub max_body_bytes: usize,

    /// Maximum number of multipart form fields
    pub max_form_fields: usize,

    /// Maximum number of `--url-query` parameters
    pub max_query_params: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_url_bytes: 8192,
            max_headers: 100,
            max_header_bytes: 8192,
            max_body_bytes: 10 * 1024 * 1024, // 10 MB
            max_form_fields: 1000,
            max_query_params: 1000,
        }
    }
}

impl Limits {
    /// Override the body cap (settings file `max_body_bytes`)
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}
