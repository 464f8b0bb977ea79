//! Pre-flight validation of a [`RequestConfig`]
//!
//! Pure: the config is only read. The first violated constraint is reported
//! with the field it concerns; header values and credentials never appear in
//! the error.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::RequestConfig;
use crate::error::{Constraint, ValidationError};
use crate::limits::Limits;

pub const STANDARD_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// Headers the transport derives from the request itself.
pub const FORBIDDEN_HEADERS: [&str; 3] = ["host", "content-length", "transfer-encoding"];

/// RFC 7230 `token`
static HEADER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").expect("valid header name regex"));

/// Validate against the default [`Limits`].
pub fn validate(config: &RequestConfig) -> Result<(), ValidationError> {
    validate_with(config, &Limits::default())
}

pub fn validate_with(config: &RequestConfig, limits: &Limits) -> Result<(), ValidationError> {
    check_method(config)?;
    let url = check_url(config, limits)?;
    check_headers(config, limits)?;
    check_body(config, limits)?;
    check_counts(config, limits)?;
    check_credentials(config, &url)?;
    check_numbers(config)?;
    Ok(())
}

fn check_method(config: &RequestConfig) -> Result<(), ValidationError> {
    let method = config.method();
    if STANDARD_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
    {
        Ok(())
    } else {
        Err(ValidationError::new(
            "method",
            Constraint::UnsupportedMethod(method.to_string()),
        ))
    }
}

fn check_url(config: &RequestConfig, limits: &Limits) -> Result<Url, ValidationError> {
    let raw = config.url();
    if raw.trim().is_empty() {
        return Err(ValidationError::new("url", Constraint::Empty));
    }
    if raw.len() > limits.max_url_bytes {
        return Err(ValidationError::new(
            "url",
            Constraint::TooLong {
                max: limits.max_url_bytes,
                actual: raw.len(),
            },
        ));
    }
    let url = config
        .parsed_url()
        .map_err(|e| ValidationError::new("url", Constraint::Malformed(e.to_string())))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::new(
                "url",
                Constraint::UnsupportedScheme(other.to_string()),
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::new(
            "url",
            Constraint::Malformed("missing host".to_string()),
        ));
    }
    Ok(url)
}

fn check_headers(config: &RequestConfig, limits: &Limits) -> Result<(), ValidationError> {
    let headers = config.headers();
    if headers.len() > limits.max_headers {
        return Err(ValidationError::new(
            "headers",
            Constraint::TooMany {
                max: limits.max_headers,
                actual: headers.len(),
            },
        ));
    }

    for (index, header) in headers.iter().enumerate() {
        let field = || format!("header '{}'", header.name());
        if !HEADER_NAME.is_match(header.name()) {
            // The name itself may be garbage; report the index only.
            return Err(ValidationError::new(
                format!("header #{}", index + 1),
                Constraint::InvalidName,
            ));
        }
        if FORBIDDEN_HEADERS
            .iter()
            .any(|forbidden| header.is_named(forbidden))
        {
            return Err(ValidationError::new(field(), Constraint::Forbidden));
        }
        if header.line_len() > limits.max_header_bytes {
            return Err(ValidationError::new(
                field(),
                Constraint::TooLong {
                    max: limits.max_header_bytes,
                    actual: header.line_len(),
                },
            ));
        }
        if header.value().is_some_and(|v| v.contains(['\r', '\n'])) {
            return Err(ValidationError::new(field(), Constraint::LineBreak));
        }
    }
    Ok(())
}

fn check_body(config: &RequestConfig, limits: &Limits) -> Result<(), ValidationError> {
    let size = config.body().map_or(0, |b| b.inline_len());
    if size > limits.max_body_bytes {
        return Err(ValidationError::new(
            "body",
            Constraint::TooLong {
                max: limits.max_body_bytes,
                actual: size,
            },
        ));
    }
    Ok(())
}

fn check_counts(config: &RequestConfig, limits: &Limits) -> Result<(), ValidationError> {
    if config.form().len() > limits.max_form_fields {
        return Err(ValidationError::new(
            "form",
            Constraint::TooMany {
                max: limits.max_form_fields,
                actual: config.form().len(),
            },
        ));
    }
    if config.query().len() > limits.max_query_params {
        return Err(ValidationError::new(
            "query",
            Constraint::TooMany {
                max: limits.max_query_params,
                actual: config.query().len(),
            },
        ));
    }
    Ok(())
}

fn check_credentials(config: &RequestConfig, url: &Url) -> Result<(), ValidationError> {
    let embedded = url.password().is_some();
    if (config.carries_credentials() || embedded)
        && url.scheme() == "http"
        && !config.allow_plaintext_auth()
    {
        return Err(ValidationError::new(
            "credentials",
            Constraint::PlaintextCredentials,
        ));
    }
    Ok(())
}

fn check_numbers(config: &RequestConfig) -> Result<(), ValidationError> {
    let timeouts = config.timeouts();
    for (field, value) in [
        ("max-time", timeouts.total),
        ("connect-timeout", timeouts.connect),
    ] {
        match value {
            Some(v) if v.is_nan() => {
                return Err(ValidationError::new(
                    field,
                    Constraint::Malformed("not a number".to_string()),
                ))
            }
            Some(v) if v < 0.0 => return Err(ValidationError::new(field, Constraint::Negative)),
            _ => {}
        }
    }
    if config.redirect().max_hops < 0 {
        return Err(ValidationError::new("max-redirs", Constraint::Negative));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataKind, DataPart, FormField, Header, QueryParam};
    use pretty_assertions::assert_eq;

    fn base() -> crate::config::RequestConfigBuilder {
        RequestConfig::builder().url("https://x.test")
    }

    fn field_of(config: RequestConfig) -> String {
        validate(&config).unwrap_err().field
    }

    #[test]
    fn test_valid_minimal() {
        assert_eq!(validate(&base().build()), Ok(()));
        assert_eq!(validate(&base().method("patch").build()), Ok(()));
    }

    #[test]
    fn test_method() {
        let err = validate(&base().method("BREW").build()).unwrap_err();
        assert_eq!(err.constraint, Constraint::UnsupportedMethod("BREW".into()));
    }

    #[test]
    fn test_url_rules() {
        assert_eq!(field_of(RequestConfig::builder().build()), "url");
        let err = validate(&RequestConfig::builder().url("ftp://x.test").build()).unwrap_err();
        assert_eq!(err.constraint, Constraint::UnsupportedScheme("ftp".into()));
        let long = format!("https://x.test/{}", "a".repeat(8192));
        assert!(matches!(
            validate(&RequestConfig::builder().url(long).build()).unwrap_err().constraint,
            Constraint::TooLong { max: 8192, .. }
        ));
        assert_eq!(validate(&RequestConfig::builder().url("x.test").build()), Ok(()));
    }

    #[test]
    fn test_header_length_boundary() {
        // "X-Big: " is 7 bytes
        let exact = Header::new("X-Big", "v".repeat(8192 - 7));
        assert_eq!(exact.line_len(), 8192);
        assert_eq!(validate(&base().header(exact).build()), Ok(()));

        let over = Header::new("X-Big", "v".repeat(8192 - 6));
        let err = validate(&base().header(over).build()).unwrap_err();
        assert_eq!(
            err.constraint,
            Constraint::TooLong {
                max: 8192,
                actual: 8193
            }
        );
    }

    #[test]
    fn test_header_count() {
        let mut builder = base();
        for i in 0..101 {
            builder = builder.header(Header::new(format!("X-{i}"), "v"));
        }
        assert_eq!(field_of(builder.build()), "headers");
    }

    #[test]
    fn test_forbidden_and_invalid_headers() {
        let err = validate(&base().header(Header::new("content-length", "5")).build()).unwrap_err();
        assert_eq!(err.constraint, Constraint::Forbidden);
        let err = validate(&base().header(Header::new("Bad Name", "v")).build()).unwrap_err();
        assert_eq!(err.constraint, Constraint::InvalidName);
        assert_eq!(err.field, "header #1");
        let err = validate(&base().header(Header::new("X-A", "a\r\nInjected: 1")).build()).unwrap_err();
        assert_eq!(err.constraint, Constraint::LineBreak);
        assert!(!err.to_string().contains("Injected"));
    }

    #[test]
    fn test_plaintext_credentials() {
        let insecure = RequestConfig::builder()
            .url("http://x.test")
            .basic_auth("u", Some("p".into()));
        assert_eq!(
            validate(&insecure.clone().build()).unwrap_err().constraint,
            Constraint::PlaintextCredentials
        );
        assert_eq!(validate(&insecure.allow_plaintext_auth(true).build()), Ok(()));

        let header = RequestConfig::builder()
            .url("http://x.test")
            .header(Header::new("Authorization", "Bearer t"))
            .build();
        assert_eq!(field_of(header), "credentials");
        assert_eq!(field_of(RequestConfig::builder().url("http://u:p@x.test").build()), "credentials");

        let https = base().bearer("t").build();
        assert_eq!(validate(&https), Ok(()));
    }

    #[test]
    fn test_negative_numbers() {
        assert_eq!(field_of(base().timeout(-1.0).build()), "max-time");
        assert_eq!(field_of(base().connect_timeout(-0.5).build()), "connect-timeout");
        assert_eq!(field_of(base().max_redirects(-1).build()), "max-redirs");
        assert_eq!(validate(&base().timeout(0.0).build()), Ok(()));
    }

    #[test]
    fn test_body_and_counts() {
        let limits = Limits::default().with_max_body_bytes(4);
        let config = base().data(DataPart::new(DataKind::Ascii, "a=12")).build();
        assert_eq!(validate_with(&config, &limits), Ok(()));
        let config = base().data(DataPart::new(DataKind::Ascii, "a=123")).build();
        assert_eq!(validate_with(&config, &limits).unwrap_err().field, "body");
        // files are measured at execution time
        let config = base().data(DataPart::new(DataKind::Binary, "@big.bin")).build();
        assert_eq!(validate_with(&config, &limits), Ok(()));

        let mut builder = base();
        for i in 0..1001 {
            builder = builder.query(QueryParam::new(format!("k{i}=v")));
        }
        assert_eq!(field_of(builder.build()), "query");

        let mut builder = base();
        for i in 0..1001 {
            builder = builder.form(FormField::text(format!("f{i}"), "v"));
        }
        assert_eq!(field_of(builder.build()), "form");
    }

    #[test]
    fn test_validation_does_not_mutate() {
        let config = base().method("BREW").build();
        let before = config.clone();
        let _ = validate(&config);
        assert_eq!(config, before);
    }
}
