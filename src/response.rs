//! Completed response

use std::fmt::Write as _;

use bytes::Bytes;
use url::Url;

use crate::cookies::CookieRecord;
use crate::transport::{HeaderMap, StatusCode, Version};

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// URL of the last hop
    pub url: Url,
    pub body: Bytes,
    /// Attempts made across every hop, retries included
    pub attempts: u32,
    /// Redirects followed
    pub redirects: u32,
    /// Cookies set by any hop, in arrival order
    pub cookies: Vec<CookieRecord>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `HTTP/1.1 200 OK`
    pub fn status_line(&self) -> String {
        let version = match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2",
            Version::HTTP_3 => "HTTP/3",
            _ => "HTTP/1.1",
        };
        match self.status.canonical_reason() {
            Some(reason) => format!("{version} {} {reason}", self.status.as_u16()),
            None => format!("{version} {}", self.status.as_u16()),
        }
    }

    /// Status line and headers as `-i` prints them, ending with a blank line.
    pub fn header_block(&self) -> String {
        let mut out = self.status_line();
        out.push_str("\r\n");
        for (name, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
        }
        out.push_str("\r\n");
        out
    }
}
