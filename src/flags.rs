//! The supported curl flag table
//!
//! Each flag is either a switch or takes exactly one value. Short forms may be
//! clustered (`-sSL`) and a value may be attached to the last short flag of a
//! cluster (`-XPOST`, `-sXPOST`). Long forms take their value from the next
//! argument.

/// Whether a flag consumes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Switch,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagId {
    // value flags
    Request,
    Url,
    Header,
    Data,
    DataRaw,
    DataBinary,
    DataUrlencode,
    Json,
    Form,
    FormString,
    UrlQuery,
    UploadFile,
    User,
    OAuth2Bearer,
    UserAgent,
    Referer,
    Cookie,
    CookieJar,
    Output,
    Cert,
    Key,
    CaCert,
    PinnedPubKey,
    Sni,
    Ciphers,
    Proxy,
    NoProxy,
    MaxTime,
    ConnectTimeout,
    Retry,
    RetryDelay,
    RetryMaxTime,
    MaxRedirs,
    MaxFilesize,
    // switches
    Location,
    LocationTrusted,
    Insecure,
    Verbose,
    Silent,
    ShowError,
    Include,
    Head,
    Get,
    Fail,
    Compressed,
    Http11,
    Http2,
    Http2PriorKnowledge,
    TlsV12,
    TlsV13,
    RetryAllErrors,
    AllowPlaintextAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSpec {
    pub id: FlagId,
    pub long: &'static str,
    pub short: Option<char>,
    pub arity: Arity,
}

impl FlagSpec {
    /// `--long` spelling, used in messages and canonical output.
    pub fn display(&self) -> String {
        format!("--{}", self.long)
    }
}

const fn value(id: FlagId, long: &'static str, short: Option<char>) -> FlagSpec {
    FlagSpec {
        id,
        long,
        short,
        arity: Arity::Value,
    }
}

const fn switch(id: FlagId, long: &'static str, short: Option<char>) -> FlagSpec {
    FlagSpec {
        id,
        long,
        short,
        arity: Arity::Switch,
    }
}

pub static FLAGS: &[FlagSpec] = &[
    value(FlagId::Request, "request", Some('X')),
    value(FlagId::Url, "url", None),
    value(FlagId::Header, "header", Some('H')),
    value(FlagId::Data, "data", Some('d')),
    value(FlagId::Data, "data-ascii", None),
    value(FlagId::DataRaw, "data-raw", None),
    value(FlagId::DataBinary, "data-binary", None),
    value(FlagId::DataUrlencode, "data-urlencode", None),
    value(FlagId::Json, "json", None),
    value(FlagId::Form, "form", Some('F')),
    value(FlagId::FormString, "form-string", None),
    value(FlagId::UrlQuery, "url-query", None),
    value(FlagId::UploadFile, "upload-file", Some('T')),
    value(FlagId::User, "user", Some('u')),
    value(FlagId::OAuth2Bearer, "oauth2-bearer", None),
    value(FlagId::UserAgent, "user-agent", Some('A')),
    value(FlagId::Referer, "referer", Some('e')),
    value(FlagId::Cookie, "cookie", Some('b')),
    value(FlagId::CookieJar, "cookie-jar", Some('c')),
    value(FlagId::Output, "output", Some('o')),
    value(FlagId::Cert, "cert", Some('E')),
    value(FlagId::Key, "key", None),
    value(FlagId::CaCert, "cacert", None),
    value(FlagId::PinnedPubKey, "pinnedpubkey", None),
    value(FlagId::Sni, "sni", None),
    value(FlagId::Ciphers, "ciphers", None),
    value(FlagId::Proxy, "proxy", Some('x')),
    value(FlagId::NoProxy, "noproxy", None),
    value(FlagId::MaxTime, "max-time", Some('m')),
    value(FlagId::ConnectTimeout, "connect-timeout", None),
    value(FlagId::Retry, "retry", None),
    value(FlagId::RetryDelay, "retry-delay", None),
    value(FlagId::RetryMaxTime, "retry-max-time", None),
    value(FlagId::MaxRedirs, "max-redirs", None),
    value(FlagId::MaxFilesize, "max-filesize", None),
    switch(FlagId::Location, "location", Some('L')),
    switch(FlagId::LocationTrusted, "location-trusted", None),
    switch(FlagId::Insecure, "insecure", Some('k')),
    switch(FlagId::Verbose, "verbose", Some('v')),
    switch(FlagId::Silent, "silent", Some('s')),
    switch(FlagId::ShowError, "show-error", Some('S')),
    switch(FlagId::Include, "include", Some('i')),
    switch(FlagId::Head, "head", Some('I')),
    switch(FlagId::Get, "get", Some('G')),
    switch(FlagId::Fail, "fail", Some('f')),
    switch(FlagId::Compressed, "compressed", None),
    switch(FlagId::Http11, "http1.1", None),
    switch(FlagId::Http2, "http2", None),
    switch(FlagId::Http2PriorKnowledge, "http2-prior-knowledge", None),
    switch(FlagId::TlsV12, "tlsv1.2", None),
    switch(FlagId::TlsV13, "tlsv1.3", None),
    switch(FlagId::RetryAllErrors, "retry-all-errors", None),
    switch(FlagId::AllowPlaintextAuth, "allow-plaintext-auth", None),
];

pub fn lookup_long(name: &str) -> Option<&'static FlagSpec> {
    FLAGS.iter().find(|f| f.long == name)
}

pub fn lookup_short(c: char) -> Option<&'static FlagSpec> {
    FLAGS.iter().find(|f| f.short == Some(c))
}

/// Primary spec for an id (the first table entry, never an alias).
pub fn spec_for(id: FlagId) -> &'static FlagSpec {
    FLAGS
        .iter()
        .find(|f| f.id == id)
        .unwrap_or_else(|| unreachable!("every FlagId has a table entry"))
}

/// One flag occurrence decoded from a flag token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFlag {
    pub spec: &'static FlagSpec,
    /// Value glued onto a short flag (`-XPOST`).
    pub attached: Option<String>,
}

/// Decode a flag token. Returns the offending spelling when a flag is unknown.
pub fn parse_flag(text: &str) -> Result<Vec<ParsedFlag>, String> {
    if let Some(name) = text.strip_prefix("--") {
        return lookup_long(name)
            .map(|spec| {
                vec![ParsedFlag {
                    spec,
                    attached: None,
                }]
            })
            .ok_or_else(|| text.to_string());
    }

    let cluster = text.strip_prefix('-').unwrap_or(text);
    let mut parsed = Vec::new();
    for (idx, c) in cluster.char_indices() {
        let spec = lookup_short(c).ok_or_else(|| format!("-{c}"))?;
        match spec.arity {
            Arity::Switch => parsed.push(ParsedFlag {
                spec,
                attached: None,
            }),
            Arity::Value => {
                let rest = &cluster[idx + c.len_utf8()..];
                parsed.push(ParsedFlag {
                    spec,
                    attached: (!rest.is_empty()).then(|| rest.to_string()),
                });
                break;
            }
        }
    }
    Ok(parsed)
}

/// True when the flag token ends in a value flag still waiting for its value.
pub fn expects_value(text: &str) -> bool {
    match parse_flag(text) {
        Ok(parsed) => parsed
            .last()
            .is_some_and(|f| f.spec.arity == Arity::Value && f.attached.is_none()),
        Err(_) => false,
    }
}
