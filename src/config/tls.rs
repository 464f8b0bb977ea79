//! TLS options as written on the command line

use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Minimum protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// SHA-256 fingerprint of a server certificate.
///
/// Accepts curl's `sha256//<base64>` form or 64 hex digits, optionally
/// separated by colons.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        let bytes = if let Some(encoded) = input.strip_prefix("sha256//") {
            STANDARD
                .decode(encoded)
                .map_err(|e| format!("invalid base64 fingerprint: {e}"))?
        } else {
            let digits: String = input.chars().filter(|c| *c != ':').collect();
            hex::decode(&digits).map_err(|e| format!("invalid hex fingerprint: {e}"))?
        };
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("expected 32 bytes, got {}", v.len()))?;
        Ok(Self(array))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256//{}", STANDARD.encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TlsOptions {
    /// Client certificate chain (PEM)
    pub cert: Option<PathBuf>,
    /// Client private key (PEM); defaults to the cert file
    pub key: Option<PathBuf>,
    /// Trust only this CA bundle instead of the bundled roots
    pub ca_cert: Option<PathBuf>,
    pub pinned: Vec<Fingerprint>,
    /// Server name sent in the handshake instead of the URL host
    pub sni: Option<String>,
    pub insecure: bool,
    pub min_version: Option<TlsVersion>,
    /// Cipher suite names in preference order
    pub ciphers: Vec<String>,
}

impl TlsOptions {
    pub fn needs_material(&self) -> bool {
        self.cert.is_some() || self.key.is_some() || self.ca_cert.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_forms_agree() {
        let hex_form = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";
        let from_hex = Fingerprint::parse(hex_form).unwrap();
        let colons: Vec<_> = hex_form
            .as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        let from_colons = Fingerprint::parse(&colons.join(":")).unwrap();
        let from_b64 = Fingerprint::parse(&from_hex.to_string()).unwrap();
        assert_eq!(from_hex, from_colons);
        assert_eq!(from_hex, from_b64);
        assert_eq!(from_hex.as_bytes()[0], 1);
    }

    #[test]
    fn test_fingerprint_rejects_wrong_length() {
        assert!(Fingerprint::parse("abcd").unwrap_err().contains("32 bytes"));
        assert!(Fingerprint::parse("sha256//!!").is_err());
    }
}
