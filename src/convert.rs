//! Option converter: classified tokens to a [`RequestConfig`]
//!
//! A single left-to-right cursor walks the tokens. Switches set a field,
//! value flags consume exactly one value (attached or the next token), and
//! plain strings become the URL.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::config::{
    BypassList, DataKind, DataPart, Fingerprint, FormField, Header, HttpVersionPref, QueryParam,
    RequestConfig, RequestConfigBuilder, TlsVersion, UploadSource,
};
use crate::error::ConversionError;
use crate::flags::{self, Arity, FlagId, FlagSpec};
use crate::token::{Token, TokenKind};

/// Convert tokens into a configuration. The result is not validated.
pub fn convert(tokens: &[Token]) -> Result<RequestConfig, ConversionError> {
    let mut state = Converter::default();
    let mut cursor = 0;

    while cursor < tokens.len() {
        let token = &tokens[cursor];
        cursor += 1;

        match token.kind() {
            TokenKind::Flag => {
                let parsed = flags::parse_flag(token.text()).map_err(|flag| {
                    ConversionError::UnknownFlag {
                        flag,
                        position: token.position(),
                    }
                })?;
                for flag in parsed {
                    match flag.spec.arity {
                        Arity::Switch => state.switch(flag.spec.id),
                        Arity::Value => match flag.attached {
                            Some(value) => state.value(flag.spec, &value, token.position())?,
                            None => {
                                let value = tokens.get(cursor).ok_or_else(|| {
                                    ConversionError::MissingValue {
                                        flag: token.text().to_string(),
                                    }
                                })?;
                                cursor += 1;
                                state.value(flag.spec, &value.literal_text(), value.position())?;
                            }
                        },
                    }
                }
            }
            TokenKind::Value | TokenKind::PlainString => {
                state.set_url(&token.literal_text(), token.position())?;
            }
        }
    }

    state.finish()
}

#[derive(Debug, Default)]
struct Converter {
    builder: RequestConfigBuilder,
    url_seen: bool,
    data_flag: Option<&'static str>,
    form_flag: Option<&'static str>,
    upload_seen: bool,
}

impl Converter {
    fn apply(&mut self, f: impl FnOnce(RequestConfigBuilder) -> RequestConfigBuilder) {
        let builder = std::mem::take(&mut self.builder);
        self.builder = f(builder);
    }

    fn set_url(&mut self, url: &str, position: usize) -> Result<(), ConversionError> {
        if self.url_seen {
            return Err(ConversionError::DuplicateUrl { position });
        }
        self.url_seen = true;
        self.apply(|b| b.url(url));
        Ok(())
    }

    fn switch(&mut self, id: FlagId) {
        self.apply(|b| match id {
            FlagId::Location => b.follow_redirects(true),
            FlagId::LocationTrusted => b.follow_redirects(true).trusted_redirects(true),
            FlagId::Insecure => b.with_tls(|t| t.insecure = true),
            FlagId::Verbose => b.with_output(|o| o.verbose = true),
            FlagId::Silent => b.with_output(|o| o.silent = true),
            FlagId::ShowError => b.with_output(|o| o.show_error = true),
            FlagId::Include => b.with_output(|o| o.include_headers = true),
            FlagId::Fail => b.with_output(|o| o.fail_on_error = true),
            FlagId::Head => b.head(true),
            FlagId::Get => b.get_mode(true),
            FlagId::Compressed => b.compressed(true),
            FlagId::Http11 => b.http_version(HttpVersionPref::Http1Only),
            FlagId::Http2 => b.http_version(HttpVersionPref::Http2),
            FlagId::Http2PriorKnowledge => b.http_version(HttpVersionPref::Http2PriorKnowledge),
            FlagId::TlsV12 => b.with_tls(|t| t.min_version = Some(TlsVersion::Tls12)),
            FlagId::TlsV13 => b.with_tls(|t| t.min_version = Some(TlsVersion::Tls13)),
            FlagId::RetryAllErrors => b.retry_all_errors(true),
            FlagId::AllowPlaintextAuth => b.allow_plaintext_auth(true),
            _ => b,
        });
    }

    fn value(
        &mut self,
        spec: &'static FlagSpec,
        value: &str,
        position: usize,
    ) -> Result<(), ConversionError> {
        let invalid = |reason: String| ConversionError::InvalidValue {
            flag: spec.display(),
            reason,
        };

        match spec.id {
            FlagId::Url => self.set_url(value, position)?,
            FlagId::Request => self.apply(|b| b.method(value)),
            FlagId::Header => {
                let header = Header::parse(value)
                    .map_err(|reason| ConversionError::MalformedHeader { position, reason })?;
                self.apply(|b| b.header(header));
            }
            FlagId::UserAgent => self.apply(|b| b.header(Header::new("User-Agent", value))),
            FlagId::Referer => self.apply(|b| b.header(Header::new("Referer", value))),
            FlagId::Data => self.data(spec, DataKind::Ascii, value),
            FlagId::DataRaw => self.data(spec, DataKind::Raw, value),
            FlagId::DataBinary => self.data(spec, DataKind::Binary, value),
            FlagId::DataUrlencode => self.data(spec, DataKind::UrlEncode, value),
            FlagId::Json => self.data(spec, DataKind::Json, value),
            FlagId::Form | FlagId::FormString => {
                let field = if spec.id == FlagId::Form {
                    FormField::parse_form(value)
                } else {
                    FormField::parse_form_string(value)
                }
                .ok_or_else(|| invalid("expected name=value".to_string()))?;
                self.form_flag.get_or_insert(spec.long);
                self.apply(|b| b.form(field));
            }
            FlagId::UrlQuery => self.apply(|b| b.query(QueryParam::new(value))),
            FlagId::UploadFile => {
                let source = if value == "-" {
                    UploadSource::Stdin
                } else {
                    UploadSource::File(PathBuf::from(value))
                };
                self.upload_seen = true;
                self.apply(|b| b.upload(source));
            }
            FlagId::User => {
                let (user, password) = match value.split_once(':') {
                    Some((user, password)) => (user, Some(password.to_string())),
                    None => (value, None),
                };
                self.apply(|b| b.basic_auth(user, password));
            }
            FlagId::OAuth2Bearer => self.apply(|b| b.bearer(value)),
            FlagId::Cookie => {
                if value.contains('=') {
                    self.apply(|b| b.cookie(value));
                } else {
                    self.apply(|b| b.cookie_file(value));
                }
            }
            FlagId::CookieJar => self.apply(|b| b.cookie_jar(value)),
            FlagId::Output => self.apply(|b| b.with_output(|o| o.path = Some(PathBuf::from(value)))),
            FlagId::Cert => self.apply(|b| b.with_tls(|t| t.cert = Some(PathBuf::from(value)))),
            FlagId::Key => self.apply(|b| b.with_tls(|t| t.key = Some(PathBuf::from(value)))),
            FlagId::CaCert => self.apply(|b| b.with_tls(|t| t.ca_cert = Some(PathBuf::from(value)))),
            FlagId::PinnedPubKey => {
                let pins = value
                    .split(';')
                    .filter(|p| !p.trim().is_empty())
                    .map(Fingerprint::parse)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(invalid)?;
                self.apply(|b| b.with_tls(|t| t.pinned.extend(pins)));
            }
            FlagId::Sni => self.apply(|b| b.with_tls(|t| t.sni = Some(value.to_string()))),
            FlagId::Ciphers => {
                let ciphers: Vec<String> = value
                    .split([':', ','])
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                self.apply(|b| b.with_tls(|t| t.ciphers = ciphers));
            }
            FlagId::Proxy => {
                let proxy = parse_proxy(value).map_err(invalid)?;
                self.apply(|b| b.proxy(proxy));
            }
            FlagId::NoProxy => self.apply(|b| b.no_proxy(BypassList::parse(value))),
            FlagId::MaxTime => {
                let secs = parse_seconds(value).map_err(invalid)?;
                self.apply(|b| b.timeout(secs));
            }
            FlagId::ConnectTimeout => {
                let secs = parse_seconds(value).map_err(invalid)?;
                self.apply(|b| b.connect_timeout(secs));
            }
            FlagId::Retry => {
                let retries: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected a non-negative integer".to_string()))?;
                self.apply(|b| b.retries(retries));
            }
            FlagId::RetryDelay => {
                let delay = parse_duration(value).map_err(invalid)?;
                self.apply(|b| b.retry_delay(delay));
            }
            FlagId::RetryMaxTime => {
                let window = parse_duration(value).map_err(invalid)?;
                self.apply(|b| b.retry_max_time(window));
            }
            FlagId::MaxRedirs => {
                let max: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected an integer".to_string()))?;
                self.apply(|b| b.max_redirects(max));
            }
            FlagId::MaxFilesize => {
                let max = parse_size(value).map_err(invalid)?;
                self.apply(|b| b.max_response_bytes(max));
            }
            _ => {}
        }
        Ok(())
    }

    fn data(&mut self, spec: &'static FlagSpec, kind: DataKind, value: &str) {
        self.data_flag.get_or_insert(spec.long);
        self.apply(|b| b.data(DataPart::new(kind, value)));
    }

    fn finish(self) -> Result<RequestConfig, ConversionError> {
        if !self.url_seen {
            return Err(ConversionError::MissingUrl);
        }
        if let (Some(data), Some(form)) = (self.data_flag, self.form_flag) {
            return Err(conflict(data, form));
        }
        if self.upload_seen {
            if let Some(other) = self.data_flag.or(self.form_flag) {
                return Err(conflict(flags::spec_for(FlagId::UploadFile).long, other));
            }
        }
        Ok(self.builder.build())
    }
}

fn conflict(first: &str, second: &str) -> ConversionError {
    ConversionError::ConflictingOptions {
        first: format!("--{first}"),
        second: format!("--{second}"),
    }
}

/// Seconds as a decimal number; sign is checked by validation.
fn parse_seconds(value: &str) -> Result<f64, String> {
    match value.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() => Ok(secs),
        _ => Err("expected a number of seconds".to_string()),
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let secs = parse_seconds(value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| "expected a non-negative number of seconds".to_string())
}

/// Bytes with an optional `k`, `m` or `g` suffix (powers of 1024).
fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let multiplier = match c.to_ascii_lowercase() {
                'k' => 1u64 << 10,
                'm' => 1 << 20,
                'g' => 1 << 30,
                _ => return Err(format!("unknown size suffix '{c}'")),
            };
            (&value[..idx], multiplier)
        }
        _ => (value, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| "expected a byte count like 1000, 500k or 10m".to_string())
}

/// Proxy URL; a bare `host:port` means an http proxy.
fn parse_proxy(value: &str) -> Result<Url, String> {
    let candidate = if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{value}")
    };
    let url = Url::parse(&candidate).map_err(|e| format!("invalid proxy URL: {e}"))?;
    match url.scheme() {
        "http" | "https" | "socks5" | "socks5h" => Ok(url),
        other => Err(format!("unsupported proxy scheme '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestBody;
    use crate::token::classify;
    use pretty_assertions::assert_eq;

    fn convert_args(args: &[&str]) -> Result<RequestConfig, ConversionError> {
        convert(&classify(args))
    }

    #[test]
    fn test_post_with_header_and_data() {
        let config =
            convert_args(&["-X", "POST", "-H", "A: 1", "-d", "x=1", "https://x.test"]).unwrap();
        assert_eq!(config.method(), "POST");
        assert_eq!(config.url(), "https://x.test");
        assert_eq!(config.header("a"), Some("1"));
        assert_eq!(
            config.body(),
            Some(&RequestBody::Data(vec![DataPart::new(DataKind::Ascii, "x=1")]))
        );
    }

    #[test]
    fn test_attached_and_clustered_flags() {
        let config = convert_args(&["-sSLXPUT", "https://x.test"]).unwrap();
        assert_eq!(config.method(), "PUT");
        assert!(config.redirect().follow);
        assert!(config.output().silent);
        assert!(config.output().show_error);
    }

    #[test]
    fn test_missing_value() {
        assert_eq!(
            convert_args(&["https://x.test", "-H"]),
            Err(ConversionError::MissingValue { flag: "-H".into() })
        );
    }

    #[test]
    fn test_unknown_flag_reports_position() {
        assert_eq!(
            convert_args(&["--frobnicate", "https://x.test"]),
            Err(ConversionError::UnknownFlag {
                flag: "--frobnicate".into(),
                position: 0
            })
        );
    }

    #[test]
    fn test_duplicate_url() {
        assert_eq!(
            convert_args(&["https://a.test", "https://b.test"]),
            Err(ConversionError::DuplicateUrl { position: 1 })
        );
        assert!(matches!(
            convert_args(&["--url", "https://a.test", "https://b.test"]),
            Err(ConversionError::DuplicateUrl { .. })
        ));
    }

    #[test]
    fn test_malformed_header_hides_value() {
        let err = convert_args(&["-H", "secret-token-value", "https://x.test"]).unwrap_err();
        assert!(matches!(err, ConversionError::MalformedHeader { position: 1, .. }));
        assert!(!err.to_string().contains("secret-token-value"));
    }

    #[test]
    fn test_retry_flags() {
        let config = convert_args(&[
            "--retry-delay",
            "0.5",
            "--retry",
            "3",
            "--retry-max-time",
            "20",
            "https://x.test",
        ])
        .unwrap();
        let retry = config.retry();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(500));
        assert_eq!(retry.max_time, Some(Duration::from_secs(20)));
        assert!(retry.is_retryable_status(503));

        let config = convert_args(&["https://x.test"]).unwrap();
        assert_eq!(config.retry().max_attempts, 1);
        assert!(!config.retry().is_retryable_status(503));
    }

    #[test]
    fn test_negative_numbers_reach_validation() {
        let config = convert_args(&["-m", "-5", "--max-redirs", "-1", "https://x.test"]).unwrap();
        assert_eq!(config.timeouts().total, Some(-5.0));
        assert_eq!(config.redirect().max_hops, -1);
        assert!(matches!(
            convert_args(&["--retry", "-1", "https://x.test"]),
            Err(ConversionError::InvalidValue { .. })
        ));
        assert!(matches!(
            convert_args(&["-m", "soon", "https://x.test"]),
            Err(ConversionError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_conflicts() {
        assert_eq!(
            convert_args(&["-d", "a=1", "-F", "f=x", "https://x.test"]),
            Err(ConversionError::ConflictingOptions {
                first: "--data".into(),
                second: "--form".into()
            })
        );
        assert!(matches!(
            convert_args(&["-T", "file.bin", "--json", "{}", "https://x.test"]),
            Err(ConversionError::ConflictingOptions { .. })
        ));
    }

    #[test]
    fn test_credentials_and_cookies() {
        let config = convert_args(&[
            "-u",
            "alice:pw:with:colons",
            "-b",
            "a=1",
            "-b",
            "cookies.txt",
            "-b",
            "b=2",
            "https://x.test",
        ])
        .unwrap();
        let basic = config.credentials().basic.as_ref().unwrap();
        assert_eq!(basic.user, "alice");
        assert_eq!(basic.password.as_ref().unwrap().expose(), "pw:with:colons");
        assert_eq!(config.cookies().inline.as_ref().map(|c| c.expose()), Some("a=1; b=2"));
        assert_eq!(config.cookies().files, vec![PathBuf::from("cookies.txt")]);
    }

    #[test]
    fn test_sizes_and_proxies() {
        assert_eq!(parse_size("10k"), Ok(10 * 1024));
        assert_eq!(parse_size("2M"), Ok(2 * 1024 * 1024));
        assert!(parse_size("ten").is_err());
        assert_eq!(parse_proxy("proxy.test:3128").unwrap().as_str(), "http://proxy.test:3128/");
        assert!(parse_proxy("ftp://proxy.test").is_err());
    }

    #[test]
    fn test_url_missing() {
        assert_eq!(convert_args(&["-s"]), Err(ConversionError::MissingUrl));
    }
}
