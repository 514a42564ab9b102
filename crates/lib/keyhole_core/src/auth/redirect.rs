//! Redirect URI policy.
//!
//! Checks run in a fixed order and the first failure wins, so callers always
//! get one stable machine-readable reason.

use std::fmt;

use url::{Host, Url};

pub const MAX_REDIRECT_URI_LEN: usize = 2048;

/// Query parameters that must not carry an absolute URL (open-redirect guard).
const REDIRECT_PARAMS: [&str; 5] = ["redirect", "redirect_to", "url", "next", "return"];

/// Why a redirect URI was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectRejection {
    Empty,
    TooLong,
    Malformed,
    UnsupportedScheme,
    InsecureScheme,
    InvalidHostname,
    DomainMismatch,
    FragmentNotAllowed,
    PortNotAllowed,
    OpenRedirect(String),
}

impl RedirectRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            RedirectRejection::Empty => "empty",
            RedirectRejection::TooLong => "too_long",
            RedirectRejection::Malformed => "malformed_url",
            RedirectRejection::UnsupportedScheme => "unsupported_scheme",
            RedirectRejection::InsecureScheme => "https_required",
            RedirectRejection::InvalidHostname => "invalid_hostname",
            RedirectRejection::DomainMismatch => "domain_mismatch",
            RedirectRejection::FragmentNotAllowed => "fragment_not_allowed",
            RedirectRejection::PortNotAllowed => "port_not_allowed",
            RedirectRejection::OpenRedirect(_) => "open_redirect",
        }
    }
}

impl fmt::Display for RedirectRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectRejection::OpenRedirect(param) => {
                write!(f, "{} (parameter '{param}')", self.reason())
            }
            _ => f.write_str(self.reason()),
        }
    }
}

/// Result of [`validate_redirect_uri`] in the `{valid, reason}` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectValidation {
    pub valid: bool,
    pub reason: Option<&'static str>,
}

impl From<&Result<Url, RedirectRejection>> for RedirectValidation {
    fn from(result: &Result<Url, RedirectRejection>) -> Self {
        match result {
            Ok(_) => RedirectValidation {
                valid: true,
                reason: None,
            },
            Err(rejection) => RedirectValidation {
                valid: false,
                reason: Some(rejection.reason()),
            },
        }
    }
}

fn is_loopback(host: Option<Host<&str>>) -> bool {
    match host {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(_)) | None => false,
    }
}

/// Reduce an allowed-domain setting (`example.com`, `Example.com:443`,
/// `https://example.com/`) to a bare lowercase host.
pub fn normalize_domain(allowed: &str) -> Option<String> {
    let trimmed = allowed.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        return Url::parse(trimmed)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    }
    let host = trimmed.split(['/', '?', '#']).next().unwrap_or(trimmed);
    let host = match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    };
    Some(host.to_ascii_lowercase())
}

/// Validate a redirect URI against an optional allowed domain.
///
/// `production` enforces HTTPS and default ports for non-loopback hosts.
pub fn validate_redirect_uri(
    uri: &str,
    allowed_domain: Option<&str>,
    production: bool,
) -> Result<Url, RedirectRejection> {
    if uri.trim().is_empty() {
        return Err(RedirectRejection::Empty);
    }
    if uri.len() > MAX_REDIRECT_URI_LEN {
        return Err(RedirectRejection::TooLong);
    }

    let url = Url::parse(uri).map_err(|_| RedirectRejection::Malformed)?;
    let loopback = is_loopback(url.host());

    match url.scheme() {
        "https" => {}
        "http" if loopback || !production => {}
        "http" => return Err(RedirectRejection::InsecureScheme),
        _ => return Err(RedirectRejection::UnsupportedScheme),
    }

    let host = url.host_str().ok_or(RedirectRejection::InvalidHostname)?;
    if host.contains("..") || host.contains('\0') || host.to_ascii_lowercase().contains("%00") {
        return Err(RedirectRejection::InvalidHostname);
    }

    if let Some(expected) = allowed_domain.and_then(normalize_domain)
        && !host.eq_ignore_ascii_case(&expected)
    {
        return Err(RedirectRejection::DomainMismatch);
    }

    if url.fragment().is_some() {
        return Err(RedirectRejection::FragmentNotAllowed);
    }

    // `Url::port` is `None` when the port is the scheme default.
    if production && !loopback && url.port().is_some() {
        return Err(RedirectRejection::PortNotAllowed);
    }

    for (name, value) in url.query_pairs() {
        let name = name.to_ascii_lowercase();
        if !REDIRECT_PARAMS.contains(&name.as_str()) {
            continue;
        }
        let value = value.trim().to_ascii_lowercase();
        if value.starts_with("http://") || value.starts_with("https://") {
            return Err(RedirectRejection::OpenRedirect(name));
        }
    }

    Ok(url)
}
