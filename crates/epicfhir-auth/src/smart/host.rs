//! Request origin and callback host validation.
//!
//! The SMART redirect URI is built from the host the browser used, so the
//! host must belong to the allowed root domain before it is echoed into an
//! authorization request.

use crate::AuthResult;
use crate::error::AuthError;

/// Scheme and host of the inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    /// Lower-cased host name without port.
    pub host: String,
    /// Whether the request arrived over TLS.
    pub secure: bool,
}

impl RequestOrigin {
    /// Builds an origin from a `Host` header value, dropping any port.
    #[must_use]
    pub fn new(host_header: &str, secure: bool) -> Self {
        Self {
            host: strip_port(host_header.trim()).to_ascii_lowercase(),
            secure,
        }
    }

    /// Returns "https" for secure requests, "http" otherwise.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// Returns `{scheme}://{host}{callback_path}`.
    #[must_use]
    pub fn redirect_uri(&self, callback_path: &str) -> String {
        format!("{}://{}{}", self.scheme(), self.host, callback_path)
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // bracketed IPv6 literal
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}

/// Returns `true` if `host` is a syntactically valid DNS name: dot-separated
/// labels of ASCII letters, digits and inner hyphens.
fn is_dns_name(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

/// Returns `true` if `host` equals `allowed_root` or is one of its subdomains.
///
/// Comparison is case-insensitive. A bare suffix match is not enough:
/// `eviltelemedicall.com` does not belong to `telemedicall.com`. Hosts that
/// are not plain DNS names (URL delimiters, userinfo, IP literals) never match.
#[must_use]
pub fn is_allowed_host(host: &str, allowed_root: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let root = allowed_root
        .trim()
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase();

    if !is_dns_name(&host) || root.is_empty() {
        return false;
    }

    host == root || host.ends_with(&format!(".{root}"))
}

/// Validates the origin's host against `allowed_root`.
///
/// # Errors
///
/// Returns `InvalidHost` if the host is outside the allowed domain.
pub fn validate_host(origin: &RequestOrigin, allowed_root: &str) -> AuthResult<()> {
    if is_allowed_host(&origin.host, allowed_root) {
        Ok(())
    } else {
        Err(AuthError::invalid_host(origin.host.clone()))
    }
}
