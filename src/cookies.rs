//! Netscape cookie files for `-b <file>` and `-c <jar>`
//!
//! Lines are `domain  include_subdomains  path  secure  expires  name  value`
//! separated by tabs. `#HttpOnly_` prefixed domains are accepted; other `#`
//! lines are comments.

use std::fmt::Write as _;

use reqwest::cookie::Jar;
use url::Url;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix seconds; 0 for a session cookie
    pub expires: u64,
    pub name: String,
    pub value: String,
}

impl CookieRecord {
    /// Build a record from a `Set-Cookie` value received from `origin`.
    pub fn from_set_cookie(header: &str, origin: &Url) -> Option<Self> {
        let mut attributes = header.split(';').map(str::trim);
        let (name, value) = attributes.next()?.split_once('=')?;
        if name.is_empty() {
            return None;
        }
        let mut record = Self {
            domain: origin.host_str()?.to_string(),
            include_subdomains: false,
            path: "/".to_string(),
            secure: false,
            expires: 0,
            name: name.to_string(),
            value: value.to_string(),
        };
        for attribute in attributes {
            let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
            match key.to_ascii_lowercase().as_str() {
                "domain" if !val.is_empty() => {
                    record.domain = val.trim_start_matches('.').to_ascii_lowercase();
                    record.include_subdomains = true;
                }
                "path" if val.starts_with('/') => record.path = val.to_string(),
                "secure" => record.secure = true,
                "max-age" => {
                    if let Ok(secs) = val.parse::<i64>() {
                        record.expires = unix_now().saturating_add_signed(secs).max(1);
                    }
                }
                _ => {}
            }
        }
        Some(record)
    }

    fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.include_subdomains {
            let _ = write!(out, "; Domain={}", self.domain);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }

    fn origin(&self) -> Option<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{}{}", self.domain, self.path)).ok()
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires != 0 && self.expires <= now
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Parse a cookie file. Malformed lines are skipped.
pub fn parse_netscape(text: &str) -> Vec<CookieRecord> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(CookieRecord {
                domain: fields[0].trim_start_matches('.').to_string(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                expires: fields[4].parse().unwrap_or(0),
                name: fields[5].to_string(),
                value: fields[6..].join("\t"),
            })
        })
        .collect()
}

/// Load unexpired records into `jar`. Returns how many were added.
pub fn load_into(jar: &Jar, records: &[CookieRecord]) -> usize {
    let now = unix_now();
    records
        .iter()
        .filter(|record| !record.is_expired(now))
        .filter_map(|record| {
            let origin = record.origin()?;
            jar.add_cookie_str(&record.to_set_cookie(), &origin);
            Some(())
        })
        .count()
}

/// Render records as a cookie file. Later records replace earlier ones with
/// the same domain, path and name.
pub fn render_netscape(records: &[CookieRecord]) -> String {
    let now = unix_now();
    let mut latest: Vec<&CookieRecord> = Vec::new();
    for record in records {
        latest.retain(|seen| {
            !(seen.domain == record.domain && seen.path == record.path && seen.name == record.name)
        });
        latest.push(record);
    }

    let mut out = String::from("# Netscape HTTP Cookie File\n# Written by kurl\n\n");
    for record in latest.into_iter().filter(|r| !r.is_expired(now)) {
        let flag = |b: bool| if b { "TRUE" } else { "FALSE" };
        let domain = if record.include_subdomains {
            format!(".{}", record.domain)
        } else {
            record.domain.clone()
        };
        let _ = writeln!(
            out,
            "{domain}\t{}\t{}\t{}\t{}\t{}\t{}",
            flag(record.include_subdomains),
            record.path,
            flag(record.secure),
            record.expires,
            record.name,
            record.value
        );
    }
    out
}
