use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Parse a URL the fetcher is allowed to request.
///
/// Only `http` and `https` are accepted. Parsing normalizes the URL,
/// percent-encoding any characters that are not valid in a request target.
///
/// # Examples
///
/// ```
/// use gator::util::parse_feed_url;
///
/// let url = parse_feed_url("https://example.com/feed with space.xml").unwrap();
/// assert_eq!(url.path(), "/feed%20with%20space.xml");
///
/// assert!(parse_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn parse_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Validate a URL a user registers as a feed source.
///
/// Applies [`parse_feed_url`] and additionally rejects hosts that resolve
/// into the local network: `localhost`, loopback, RFC 1918, link-local and
/// unique-local IPv6 literals. Hostnames are not resolved.
///
/// # Examples
///
/// ```
/// use gator::util::validate_url;
///
/// assert!(validate_url("https://blog.boot.dev/index.xml").is_ok());
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_feed_url(url_str)?;

    let Some(host) = url.host_str() else {
        return Ok(url);
    };
    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::Localhost);
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_internal(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

fn is_internal(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed_url_schemes() {
        assert!(parse_feed_url("https://example.com/feed.xml").is_ok());
        assert!(parse_feed_url("http://127.0.0.1:8080/rss").is_ok());
        assert!(matches!(
            parse_feed_url("ftp://example.com/feed"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            parse_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_feed_url_percent_encodes() {
        let url = parse_feed_url("  https://example.com/a b?q=ü  ").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a%20b?q=%C3%BC");
    }

    #[test]
    fn test_validate_accepts_public_hosts() {
        assert!(validate_url("https://news.ycombinator.com/rss").is_ok());
        assert!(validate_url("https://example.com:443/feed.xml").is_ok());
        assert!(validate_url("http://8.8.8.8/feed").is_ok());
    }

    #[test]
    fn test_validate_rejects_local_hosts() {
        for url in [
            "http://localhost/feed",
            "http://LOCALHOST:3000/feed",
            "http://127.0.0.1/feed",
            "http://[::1]/feed",
        ] {
            assert!(
                matches!(validate_url(url), Err(UrlValidationError::Localhost)),
                "{url} should be rejected as localhost"
            );
        }
    }

    #[test]
    fn test_validate_rejects_internal_ranges() {
        for url in [
            "http://10.0.0.1/feed",
            "http://172.16.0.1/feed",
            "http://192.168.1.1:8080/feed",
            "http://169.254.1.1/feed",
            "http://0.0.0.0/feed",
            "http://[fe80::1]/feed",
            "http://[fd00::1]/feed",
        ] {
            assert!(
                matches!(validate_url(url), Err(UrlValidationError::PrivateIp(_))),
                "{url} should be rejected as private"
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        assert!(validate_url("file:///etc/passwd").is_err());
    }
}
