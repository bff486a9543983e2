//! The canonical string a request signature covers:
//!
//! ```text
//! v1\n<METHOD>\n<PATH_WITH_QUERY>\n<appId>\n<ts>\n<nonce>\n<base64url(SHA256(body))>\n
//! ```
//!
//! The method is uppercased; the path carries the literal `?` and query string
//! byte-for-byte as received. Clients that omit the version header sign the
//! deprecated form whose path drops the query string; nothing else differs.

use crate::sha256_b64url;

/// The only supported value of the version header.
pub const POP_VERSION: &str = "v1";

/// The pieces of a request that participate in the signature.
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub app_id: &'a str,
    pub ts: i64,
    pub nonce: &'a str,
    pub body_hash: &'a str,
}

impl CanonicalRequest<'_> {
    /// The string signed under `x-pop-v: v1`.
    pub fn signed_string(&self) -> String {
        self.render(true)
    }

    /// The deprecated string signed when the version header is absent.
    pub fn legacy_signed_string(&self) -> String {
        self.render(false)
    }

    fn render(&self, include_query: bool) -> String {
        let path = match self.query {
            Some(query) if include_query => format!("{}?{}", self.path, query),
            _ => self.path.to_string(),
        };
        format!(
            "{POP_VERSION}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.method.to_uppercase(),
            path,
            self.app_id,
            self.ts,
            self.nonce,
            self.body_hash,
        )
    }
}

/// base64url SHA-256 of the raw request body; the empty body hashes the empty
/// string.
pub fn body_hash(body: &[u8]) -> String {
    sha256_b64url(body)
}
