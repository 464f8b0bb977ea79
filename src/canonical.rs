//! Canonical command rendering
//!
//! [`RequestConfig::to_command`] prints a curl command that converts back
//! into an equal configuration. Every value is single-quoted, so expansion
//! leaves it alone. [`RequestConfig::to_redacted_command`] masks credentials
//! and is what logs and `kurl check` show.

use crate::config::{
    DataKind, FormKind, HttpVersionPref, RequestBody, RequestConfig, TlsVersion, UploadSource,
    DEFAULT_MAX_REDIRECTS, DEFAULT_RETRY_DELAY,
};
use crate::redact::{is_sensitive_header, sanitize_url, REDACTED};

/// Quote for a POSIX shell: `'...'` with embedded quotes as `'\''`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl RequestConfig {
    pub fn to_command(&self) -> String {
        render(self, false)
    }

    pub fn to_redacted_command(&self) -> String {
        render(self, true)
    }
}

struct Command {
    parts: Vec<String>,
}

impl Command {
    fn flag(&mut self, flag: &str) {
        self.parts.push(flag.to_string());
    }

    fn value(&mut self, flag: &str, value: &str) {
        self.parts.push(flag.to_string());
        self.parts.push(shell_quote(value));
    }
}

fn render(config: &RequestConfig, redact: bool) -> String {
    let mut cmd = Command {
        parts: vec!["curl".to_string()],
    };

    if let Some(method) = config.explicit_method() {
        cmd.value("-X", method);
    }
    if config.is_head() {
        cmd.flag("-I");
    }
    if config.is_get_mode() {
        cmd.flag("-G");
    }

    for header in config.headers() {
        let arg = match header.value() {
            Some(value) if redact && !value.is_empty() && is_sensitive_header(header.name()) => {
                format!("{}: {}", header.name(), REDACTED)
            }
            _ => header.to_arg(),
        };
        cmd.value("-H", &arg);
    }

    match config.body() {
        Some(RequestBody::Data(parts)) => {
            for part in parts {
                let flag = match part.kind {
                    DataKind::Ascii => "--data",
                    DataKind::Raw => "--data-raw",
                    DataKind::Binary => "--data-binary",
                    DataKind::UrlEncode => "--data-urlencode",
                    DataKind::Json => "--json",
                };
                cmd.value(flag, &part.value);
            }
        }
        Some(RequestBody::Upload(UploadSource::File(path))) => {
            cmd.value("-T", &path.display().to_string())
        }
        Some(RequestBody::Upload(UploadSource::Stdin)) => cmd.value("-T", "-"),
        Some(RequestBody::Bytes(bytes)) => {
            cmd.value("--data-binary", &String::from_utf8_lossy(bytes))
        }
        Some(RequestBody::Stream(_)) => cmd.value("--data-binary", "@-"),
        None => {}
    }

    for field in config.form() {
        let flag = match field.kind {
            FormKind::Form => "-F",
            FormKind::FormString => "--form-string",
        };
        cmd.value(flag, &field.to_arg());
    }
    for param in config.query() {
        cmd.value("--url-query", param.raw());
    }

    let credentials = config.credentials();
    if let Some(basic) = &credentials.basic {
        let arg = match &basic.password {
            Some(_) if redact => format!("{}:{}", basic.user, REDACTED),
            Some(password) => format!("{}:{}", basic.user, password.expose()),
            None => basic.user.clone(),
        };
        cmd.value("-u", &arg);
    }
    if let Some(token) = &credentials.bearer {
        let token = if redact { REDACTED } else { token.expose() };
        cmd.value("--oauth2-bearer", token);
    }

    let cookies = config.cookies();
    if let Some(inline) = &cookies.inline {
        cmd.value("-b", if redact { REDACTED } else { inline.expose() });
    }
    for file in &cookies.files {
        cmd.value("-b", &file.display().to_string());
    }
    if let Some(jar) = &cookies.jar {
        cmd.value("-c", &jar.display().to_string());
    }

    let tls = config.tls();
    if let Some(cert) = &tls.cert {
        cmd.value("--cert", &cert.display().to_string());
    }
    if let Some(key) = &tls.key {
        cmd.value("--key", &key.display().to_string());
    }
    if let Some(ca) = &tls.ca_cert {
        cmd.value("--cacert", &ca.display().to_string());
    }
    if !tls.pinned.is_empty() {
        let pins: Vec<String> = tls.pinned.iter().map(ToString::to_string).collect();
        cmd.value("--pinnedpubkey", &pins.join(";"));
    }
    if let Some(sni) = &tls.sni {
        cmd.value("--sni", sni);
    }
    if !tls.ciphers.is_empty() {
        cmd.value("--ciphers", &tls.ciphers.join(":"));
    }
    if tls.insecure {
        cmd.flag("-k");
    }
    match tls.min_version {
        Some(TlsVersion::Tls12) => cmd.flag("--tlsv1.2"),
        Some(TlsVersion::Tls13) => cmd.flag("--tlsv1.3"),
        None => {}
    }

    if let Some(proxy) = config.proxy() {
        let proxy = if redact {
            sanitize_url(proxy.as_str())
        } else {
            proxy.to_string()
        };
        cmd.value("-x", &proxy);
    }
    if let Some(bypass) = config.no_proxy() {
        cmd.value("--noproxy", bypass.as_str());
    }

    let timeouts = config.timeouts();
    if let Some(total) = timeouts.total {
        cmd.value("-m", &total.to_string());
    }
    if let Some(connect) = timeouts.connect {
        cmd.value("--connect-timeout", &connect.to_string());
    }

    let retry = config.retry();
    if retry.retries() > 0 {
        cmd.value("--retry", &retry.retries().to_string());
    }
    if retry.base_delay != DEFAULT_RETRY_DELAY {
        cmd.value("--retry-delay", &retry.base_delay.as_secs_f64().to_string());
    }
    if let Some(window) = retry.max_time {
        cmd.value("--retry-max-time", &window.as_secs_f64().to_string());
    }
    if retry.retry_all_errors {
        cmd.flag("--retry-all-errors");
    }

    let redirect = config.redirect();
    if redirect.trusted {
        cmd.flag("--location-trusted");
    } else if redirect.follow {
        cmd.flag("-L");
    }
    if redirect.max_hops != DEFAULT_MAX_REDIRECTS {
        cmd.value("--max-redirs", &redirect.max_hops.to_string());
    }
    if let Some(max) = config.max_response_bytes() {
        cmd.value("--max-filesize", &max.to_string());
    }

    if config.compressed() {
        cmd.flag("--compressed");
    }
    match config.http_version() {
        HttpVersionPref::Auto => {}
        HttpVersionPref::Http1Only => cmd.flag("--http1.1"),
        HttpVersionPref::Http2 => cmd.flag("--http2"),
        HttpVersionPref::Http2PriorKnowledge => cmd.flag("--http2-prior-knowledge"),
    }
    if config.allow_plaintext_auth() {
        cmd.flag("--allow-plaintext-auth");
    }

    let output = config.output();
    if let Some(path) = &output.path {
        cmd.value("-o", &path.display().to_string());
    }
    for (on, flag) in [
        (output.include_headers, "-i"),
        (output.fail_on_error, "-f"),
        (output.silent, "-s"),
        (output.show_error, "-S"),
        (output.verbose, "-v"),
    ] {
        if on {
            cmd.flag(flag);
        }
    }

    let url = if redact {
        sanitize_url(config.url())
    } else {
        config.url().to_string()
    };
    cmd.value("--url", &url);

    cmd.parts.join(" ")
}
