//! Turn a [`RequestConfig`] into wire material
//!
//! Files and stdin are read here, once per execution, through the executor's
//! [`ResourceLoader`]. Everything except a `-T -` upload or a caller stream
//! ends up buffered, so retries and redirects can resend it.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT,
};
use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::config::{
    encode_component, DataKind, DataPart, FormField, FormValue, RequestBody, RequestConfig,
    UploadSource, UploadStream,
};
use crate::error::{Constraint, ExecutionError, KurlError, ValidationError};
use crate::limits::Limits;
use crate::loader::ResourceLoader;
use crate::redact::Secret;
use crate::transport::tls::TlsMaterial;
use crate::transport::{OutboundBody, TransportSettings};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const JSON: &str = "application/json";

pub(crate) enum PreparedBody {
    Empty,
    Bytes(Bytes),
    /// Taken by the first attempt
    Stream(Option<UploadStream>),
}

impl PreparedBody {
    pub(crate) fn is_replayable(&self) -> bool {
        !matches!(self, PreparedBody::Stream(_))
    }

    /// Body for the next send. Buffered bodies are cheap to clone; a stream
    /// is handed out once and leaves an empty body behind.
    pub(crate) fn next_outbound(&mut self) -> OutboundBody {
        match self {
            PreparedBody::Empty => OutboundBody::Empty,
            PreparedBody::Bytes(bytes) => OutboundBody::Bytes(bytes.clone()),
            PreparedBody::Stream(stream) => match stream.take() {
                Some(stream) => OutboundBody::Stream(stream),
                None => OutboundBody::Empty,
            },
        }
    }
}

pub(crate) struct Prepared {
    pub method: Method,
    pub url: Url,
    /// Headers from flags and derived ones, without jar cookies
    pub headers: HeaderMap,
    pub body: PreparedBody,
    /// Transport settings before per-host proxy selection
    pub settings: TransportSettings,
    pub material: TlsMaterial,
}

pub(crate) async fn prepare(
    config: &RequestConfig,
    loader: &dyn ResourceLoader,
    limits: &Limits,
    user_agent: Option<&str>,
) -> Result<Prepared, KurlError> {
    let method = Method::from_bytes(config.method().to_ascii_uppercase().as_bytes()).map_err(|_| {
        ValidationError::new("method", Constraint::UnsupportedMethod(config.method().to_string()))
    })?;

    let mut derived = HeaderMap::new();
    let mut query_data = None;
    let body = match config.body() {
        Some(RequestBody::Data(parts)) => {
            let data = join_data(parts, loader).await?;
            if config.is_get_mode() {
                query_data = Some(data);
                PreparedBody::Empty
            } else {
                if parts.iter().any(|p| p.kind == DataKind::Json) {
                    derived.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
                    derived.insert(ACCEPT, HeaderValue::from_static(JSON));
                } else {
                    derived.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
                }
                PreparedBody::Bytes(data)
            }
        }
        Some(RequestBody::Upload(UploadSource::File(path))) => {
            PreparedBody::Bytes(read(loader, path).await?)
        }
        Some(RequestBody::Upload(UploadSource::Stdin)) => {
            PreparedBody::Stream(Some(loader.stdin().map_err(|e| resource("stdin", e))?))
        }
        Some(RequestBody::Bytes(bytes)) => PreparedBody::Bytes(bytes.clone()),
        Some(RequestBody::Stream(stream)) => match stream.take() {
            Some(stream) => PreparedBody::Stream(Some(stream)),
            None => {
                return Err(ExecutionError::Resource {
                    what: "request body".to_string(),
                    reason: "streamed body already consumed".to_string(),
                }
                .into())
            }
        },
        None if !config.form().is_empty() => {
            let boundary = boundary();
            let body = encode_multipart(config.form(), &boundary, loader).await?;
            let content_type = format!("multipart/form-data; boundary={boundary}");
            derived.insert(CONTENT_TYPE, header_value("Content-Type", &content_type)?);
            PreparedBody::Bytes(body)
        }
        None => PreparedBody::Empty,
    };

    if let PreparedBody::Bytes(bytes) = &body {
        if bytes.len() > limits.max_body_bytes {
            return Err(ValidationError::new(
                "body",
                Constraint::TooLong {
                    max: limits.max_body_bytes,
                    actual: bytes.len(),
                },
            )
            .into());
        }
    }

    let url = build_url(config, query_data.as_deref())?;
    if let Some(value) = authorization(config) {
        derived.insert(AUTHORIZATION, header_value("Authorization", &value)?);
    }
    let inline_cookies = config.cookies().inline.as_ref().map(Secret::expose);
    if let Some(cookies) = inline_cookies.filter(|c| !c.is_empty()) {
        derived.insert(COOKIE, header_value("Cookie", cookies)?);
    }

    let mut settings = TransportSettings {
        proxy: None,
        tls: config.tls().clone(),
        compressed: config.compressed(),
        connect_timeout: config.timeouts().connect(),
        http_version: config.http_version(),
        user_agent: user_agent.map(str::to_string),
    };
    let headers = merge_headers(config, derived, &mut settings)?;
    let material = load_material(config, loader).await?;

    debug!(
        method = %method,
        body_bytes = match &body {
            PreparedBody::Bytes(b) => b.len() as u64,
            _ => 0,
        },
        streaming = !body.is_replayable(),
        "prepared request"
    );
    Ok(Prepared {
        method,
        url,
        headers,
        body,
        settings,
        material,
    })
}

fn resource(what: impl Into<String>, err: std::io::Error) -> ExecutionError {
    ExecutionError::Resource {
        what: what.into(),
        reason: err.to_string(),
    }
}

async fn read(loader: &dyn ResourceLoader, path: &Path) -> Result<Bytes, ExecutionError> {
    loader
        .read(path)
        .await
        .map_err(|e| resource(format!("file '{}'", path.display()), e))
}

/// `-` reads stdin, anything else is a path.
async fn read_source(loader: &dyn ResourceLoader, source: &str) -> Result<Bytes, ExecutionError> {
    if source == "-" {
        loader.read_stdin().await.map_err(|e| resource("stdin", e))
    } else {
        read(loader, Path::new(source)).await
    }
}

// ============================================================================
// BODY
// ============================================================================

/// Join data parts: `--json` parts are concatenated, others joined with `&`.
async fn join_data(parts: &[DataPart], loader: &dyn ResourceLoader) -> Result<Bytes, ExecutionError> {
    let separator: &[u8] = if parts.iter().all(|p| p.kind == DataKind::Json) {
        b""
    } else {
        b"&"
    };
    let mut out = BytesMut::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.put_slice(separator);
        }
        out.put(data_part(part, loader).await?);
    }
    Ok(out.freeze())
}

async fn data_part(part: &DataPart, loader: &dyn ResourceLoader) -> Result<Bytes, ExecutionError> {
    match part.kind {
        DataKind::Raw => Ok(Bytes::from(part.value.clone())),
        DataKind::Ascii => match part.file() {
            Some(source) => {
                let contents = read_source(loader, source).await?;
                Ok(contents
                    .iter()
                    .copied()
                    .filter(|b| *b != b'\r' && *b != b'\n')
                    .collect::<Vec<u8>>()
                    .into())
            }
            None => Ok(Bytes::from(part.value.clone())),
        },
        DataKind::Binary | DataKind::Json => match part.file() {
            Some(source) => read_source(loader, source).await,
            None => Ok(Bytes::from(part.value.clone())),
        },
        DataKind::UrlEncode => urlencode_part(&part.value, loader).await.map(Bytes::from),
    }
}

/// `name=value`, `=value`, `name@file`, `@file` and `value`.
async fn urlencode_part(value: &str, loader: &dyn ResourceLoader) -> Result<String, ExecutionError> {
    let Some(split) = value.find(['=', '@']) else {
        return Ok(encode_component(value.as_bytes()));
    };
    let (name, rest) = (&value[..split], &value[split + 1..]);
    let encoded = if value.as_bytes()[split] == b'@' {
        encode_component(&read_source(loader, rest).await?)
    } else {
        encode_component(rest.as_bytes())
    };
    Ok(if name.is_empty() {
        encoded
    } else {
        format!("{name}={encoded}")
    })
}

fn boundary() -> String {
    let a: u64 = rand::random();
    let b: u64 = rand::random();
    format!("------------------------{a:016x}{b:016x}")
}

async fn encode_multipart(
    fields: &[FormField],
    boundary: &str,
    loader: &dyn ResourceLoader,
) -> Result<Bytes, ExecutionError> {
    let mut out = BytesMut::new();
    for field in fields {
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"\r\nContent-Disposition: form-data; name=\"");
        out.put_slice(quote_param(&field.name).as_bytes());
        out.put_slice(b"\"");

        let contents = match &field.value {
            FormValue::Text(text) => Bytes::from(text.clone()),
            FormValue::Contents(path) => read_source(loader, &path.to_string_lossy()).await?,
            FormValue::File { path, content_type } => {
                let filename = path
                    .file_name()
                    .map_or_else(|| "-".into(), |name| name.to_string_lossy());
                out.put_slice(b"; filename=\"");
                out.put_slice(quote_param(&filename).as_bytes());
                out.put_slice(b"\"\r\nContent-Type: ");
                out.put_slice(
                    content_type
                        .as_deref()
                        .unwrap_or_else(|| guess_mime(path))
                        .as_bytes(),
                );
                read_source(loader, &path.to_string_lossy()).await?
            }
        };
        out.put_slice(b"\r\n\r\n");
        out.put(contents);
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(b"--\r\n");
    Ok(out.freeze())
}

fn quote_param(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// URL AND HEADERS
// ============================================================================

fn build_url(config: &RequestConfig, get_data: Option<&[u8]>) -> Result<Url, ExecutionError> {
    let mut url = config.parsed_url().map_err(|e| ExecutionError::InvalidUrl {
        url: crate::redact::sanitize_url(config.url()),
        reason: e.to_string(),
    })?;

    let mut extra: Vec<String> = Vec::new();
    if let Some(data) = get_data.filter(|d| !d.is_empty()) {
        extra.push(String::from_utf8_lossy(data).into_owned());
    }
    extra.extend(config.query().iter().map(|q| q.encoded()));
    if !extra.is_empty() {
        let joined = extra.join("&");
        let query = match url.query().filter(|q| !q.is_empty()) {
            Some(existing) => format!("{existing}&{joined}"),
            None => joined,
        };
        url.set_query(Some(&query));
    }
    Ok(url)
}

fn authorization(config: &RequestConfig) -> Option<String> {
    let credentials = config.credentials();
    if let Some(token) = &credentials.bearer {
        return Some(format!("Bearer {}", token.expose()));
    }
    credentials.basic.as_ref().map(|basic| {
        let password = basic.password.as_ref().map_or("", |p| p.expose());
        format!("Basic {}", STANDARD.encode(format!("{}:{}", basic.user, password)))
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ValidationError> {
    HeaderValue::from_bytes(value.as_bytes()).map_err(|_| {
        ValidationError::new(
            format!("header '{name}'"),
            Constraint::Malformed("value contains bytes not allowed in a header".to_string()),
        )
    })
}

/// User headers replace derived ones of the same name; `Name:` removes a
/// derived header without sending anything.
fn merge_headers(
    config: &RequestConfig,
    mut derived: HeaderMap,
    settings: &mut TransportSettings,
) -> Result<HeaderMap, ValidationError> {
    let mut user = HeaderMap::new();
    for header in config.headers() {
        let name = HeaderName::from_bytes(header.name().as_bytes()).map_err(|_| {
            ValidationError::new(format!("header '{}'", header.name()), Constraint::InvalidName)
        })?;
        derived.remove(&name);
        match header.value() {
            Some(value) => {
                user.append(name, header_value(header.name(), value)?);
            }
            None if name == USER_AGENT => settings.user_agent = None,
            None => {}
        }
    }
    derived.extend(user);
    Ok(derived)
}

async fn load_material(
    config: &RequestConfig,
    loader: &dyn ResourceLoader,
) -> Result<TlsMaterial, ExecutionError> {
    let tls = config.tls();
    if !tls.needs_material() {
        return Ok(TlsMaterial::default());
    }
    let mut material = TlsMaterial::default();
    if let Some(path) = &tls.ca_cert {
        material.ca_pem = Some(read(loader, path).await?);
    }
    if let Some(path) = &tls.cert {
        material.cert_pem = Some(read(loader, path).await?);
    }
    if let Some(path) = &tls.key {
        material.key_pem = Some(read(loader, path).await?);
    }
    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FormField, Header, QueryParam};
    use crate::loader::MemoryLoader;
    use pretty_assertions::assert_eq;

    async fn run(config: RequestConfig, loader: &MemoryLoader) -> Prepared {
        prepare(&config, loader, &Limits::default(), Some("kurl-test"))
            .await
            .unwrap()
    }

    fn body_of(prepared: &Prepared) -> &[u8] {
        match &prepared.body {
            PreparedBody::Bytes(b) => b,
            _ => panic!("expected a buffered body"),
        }
    }

    fn base() -> crate::config::RequestConfigBuilder {
        RequestConfig::builder().url("https://api.test/items")
    }

    #[tokio::test]
    async fn test_data_parts_join_and_content_type() {
        let loader = MemoryLoader::new().with_file("body.txt", "line1\r\nline2\n");
        let config = base()
            .data(DataPart::new(DataKind::Ascii, "a=1"))
            .data(DataPart::new(DataKind::Ascii, "@body.txt"))
            .data(DataPart::new(DataKind::UrlEncode, "q=a b&c"))
            .build();
        let prepared = run(config, &loader).await;
        assert_eq!(prepared.method, Method::POST);
        assert_eq!(body_of(&prepared), b"a=1&line1line2&q=a+b%26c");
        assert_eq!(prepared.headers[CONTENT_TYPE], FORM_URLENCODED);
    }

    #[tokio::test]
    async fn test_json_parts_concatenate() {
        let config = base()
            .data(DataPart::new(DataKind::Json, "{\"a\":"))
            .data(DataPart::new(DataKind::Json, "1}"))
            .build();
        let prepared = run(config, &MemoryLoader::new()).await;
        assert_eq!(body_of(&prepared), b"{\"a\":1}");
        assert_eq!(prepared.headers[CONTENT_TYPE], JSON);
        assert_eq!(prepared.headers[ACCEPT], JSON);
    }

    #[tokio::test]
    async fn test_urlencode_forms() {
        let loader = MemoryLoader::new().with_file("v.txt", "x y");
        assert_eq!(urlencode_part("name=a b", &loader).await.unwrap(), "name=a+b");
        assert_eq!(urlencode_part("=a&b", &loader).await.unwrap(), "a%26b");
        assert_eq!(urlencode_part("name@v.txt", &loader).await.unwrap(), "name=x+y");
        assert_eq!(urlencode_part("@v.txt", &loader).await.unwrap(), "x+y");
        assert_eq!(urlencode_part("plain text", &loader).await.unwrap(), "plain+text");
    }

    #[tokio::test]
    async fn test_get_mode_moves_data_to_query() {
        let config = base()
            .url("https://api.test/search?page=2")
            .data(DataPart::new(DataKind::Ascii, "q=rust"))
            .query(QueryParam::new("lang=en us"))
            .get_mode(true)
            .build();
        let prepared = run(config, &MemoryLoader::new()).await;
        assert_eq!(prepared.method, Method::GET);
        assert!(matches!(prepared.body, PreparedBody::Empty));
        assert_eq!(prepared.url.query(), Some("page=2&q=rust&lang=en+us"));
        assert!(prepared.headers.get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_multipart_encoding() {
        let loader = MemoryLoader::new().with_file("/tmp/pic.png", "PNG");
        let config = base()
            .form(FormField::text("title", "hello"))
            .form(FormField::parse_form("file=@/tmp/pic.png").unwrap())
            .build();
        let prepared = run(config, &loader).await;
        let content_type = prepared.headers[CONTENT_TYPE].to_str().unwrap().to_string();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let body = String::from_utf8(body_of(&prepared).to_vec()).unwrap();
        assert_eq!(
            body,
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n\
                 --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"pic.png\"\r\n\
                 Content-Type: image/png\r\n\r\nPNG\r\n--{boundary}--\r\n"
            )
        );
    }

    #[tokio::test]
    async fn test_auth_and_user_headers() {
        let config = base()
            .basic_auth("alice", Some("s3cret".into()))
            .header(Header::new("X-Trace", "1"))
            .header(Header::new("X-Trace", "2"))
            .header(Header::suppress("User-Agent"))
            .cookie("a=1")
            .build();
        let prepared = run(config, &MemoryLoader::new()).await;
        assert_eq!(prepared.headers[AUTHORIZATION], "Basic YWxpY2U6czNjcmV0");
        assert_eq!(prepared.headers.get_all("x-trace").iter().count(), 2);
        assert_eq!(prepared.headers[COOKIE], "a=1");
        assert_eq!(prepared.settings.user_agent, None);

        let explicit = base()
            .bearer("tok")
            .header(Header::new("Authorization", "Custom x"))
            .build();
        let prepared = run(explicit, &MemoryLoader::new()).await;
        assert_eq!(prepared.headers[AUTHORIZATION], "Custom x");
        assert_eq!(prepared.settings.user_agent.as_deref(), Some("kurl-test"));
    }

    #[tokio::test]
    async fn test_body_cap_after_loading() {
        let loader = MemoryLoader::new().with_file("big.bin", vec![0u8; 11]);
        let limits = Limits::default().with_max_body_bytes(10);
        let config = base().data(DataPart::new(DataKind::Binary, "@big.bin")).build();
        let err = prepare(&config, &loader, &limits, None).await.err().unwrap();
        assert!(matches!(
            err,
            KurlError::Validation(ValidationError {
                constraint: Constraint::TooLong { max: 10, actual: 11 },
                ..
            })
        ));

        let loader = MemoryLoader::new().with_file("big.bin", vec![0u8; 10]);
        assert!(prepare(&config, &loader, &limits, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_stdin_upload_streams_and_missing_file_errors() {
        let loader = MemoryLoader::new().with_stdin("piped");
        let config = base().upload(UploadSource::Stdin).build();
        let prepared = run(config, &loader).await;
        assert_eq!(prepared.method, Method::PUT);
        assert!(!prepared.body.is_replayable());

        let config = base().data(DataPart::new(DataKind::Binary, "@missing.bin")).build();
        let err = prepare(&config, &loader, &Limits::default(), None).await.err().unwrap();
        assert!(err.to_string().contains("missing.bin"));
    }
}
