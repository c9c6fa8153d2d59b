//! Anti-bot challenge detection.
//!
//! [`classify`] is a pure function over status, headers and (optionally) the
//! decoded body. It never performs I/O and never errors; the orchestrator
//! matches on the returned [`Classification`] to decide whether to escalate.

use std::fmt;

/// `Server` header tokens of known anti-bot vendors.
const VENDOR_SERVER_TOKENS: &[&str] = &["cloudflare", "ddos", "sucuri"];

/// Response headers only anti-bot vendors set.
const VENDOR_HEADERS: &[&str] = &["cf-ray", "cf-cache-status", "x-sucuri-id"];

/// Lowercase body markers of interstitial pages (English and German).
const BODY_MARKERS: &[&str] = &[
    "challenges.cloudflare.com",
    "cf-chl-",
    "please verify you are human",
    "verify you are human",
    "checking your browser before accessing",
    "checking your browser",
    "just a moment",
    "bestätigen sie, dass sie ein mensch sind",
    "überprüfung, ob sie ein mensch sind",
    "ihr browser wird überprüft",
];

/// Why a response was judged a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeSignal {
    /// 403 or 429 without any vendor fingerprint.
    Status(u16),
    /// `Server` header names a vendor.
    VendorServer(String),
    /// A vendor-specific header is present.
    VendorHeader(String),
    /// The body contains an interstitial marker.
    BodyMarker(&'static str),
}

impl fmt::Display for ChallengeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeSignal::Status(s) => write!(f, "status {s}"),
            ChallengeSignal::VendorServer(s) => write!(f, "server '{s}'"),
            ChallengeSignal::VendorHeader(h) => write!(f, "header '{h}'"),
            ChallengeSignal::BodyMarker(m) => write!(f, "body marker '{m}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Page,
    Challenge(ChallengeSignal),
}

impl Classification {
    pub fn is_challenge(&self) -> bool {
        matches!(self, Classification::Challenge(_))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Page => f.write_str("page"),
            Classification::Challenge(signal) => write!(f, "challenge ({signal})"),
        }
    }
}

/// Classify a response.
///
/// Body markers and a vendor `Server` token mark a challenge on any status.
/// Other vendor headers ride along on ordinary CDN-served pages too, so they
/// only count on a refused response (403, 429 or 503); a bare 403/429 is a
/// challenge regardless.
pub fn classify(status: u16, headers: &[(String, String)], body: Option<&str>) -> Classification {
    if let Some(marker) = body.and_then(body_marker) {
        return Classification::Challenge(ChallengeSignal::BodyMarker(marker));
    }

    if let Some(server) = vendor_server(headers) {
        return Classification::Challenge(ChallengeSignal::VendorServer(server));
    }

    let refused = matches!(status, 403 | 429);
    if !(refused || status == 503) {
        return Classification::Page;
    }

    if let Some(name) = vendor_header(headers) {
        return Classification::Challenge(ChallengeSignal::VendorHeader(name));
    }

    if refused {
        Classification::Challenge(ChallengeSignal::Status(status))
    } else {
        Classification::Page
    }
}

/// The first body marker found, case-insensitively.
pub fn body_marker(body: &str) -> Option<&'static str> {
    if body.is_empty() {
        return None;
    }
    let low = body.to_lowercase();
    BODY_MARKERS.iter().copied().find(|m| low.contains(m))
}

fn vendor_server(headers: &[(String, String)]) -> Option<String> {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("server"))
        .find(|(_, value)| {
            let low = value.to_lowercase();
            VENDOR_SERVER_TOKENS.iter().any(|t| low.contains(t))
        })
        .map(|(_, value)| value.clone())
}

fn vendor_header(headers: &[(String, String)]) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| VENDOR_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)))
        .map(|(name, _)| name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn plain_200_is_page() {
        assert_eq!(
            classify(200, &h(&[("content-type", "text/html")]), Some("<h1>Chapter 3</h1>")),
            Classification::Page
        );
    }

    #[test]
    fn cdn_headers_on_200_are_not_a_challenge() {
        let headers = h(&[("Server", "nginx"), ("CF-RAY", "8a1b2c"), ("CF-Cache-Status", "HIT")]);
        assert_eq!(classify(200, &headers, Some("<html>ok</html>")), Classification::Page);
    }

    #[test]
    fn vendor_server_on_200_is_challenge() {
        let headers = h(&[("Server", "cloudflare"), ("CF-RAY", "8a1b2c")]);
        assert_eq!(
            classify(200, &headers, Some("<html>ok</html>")),
            Classification::Challenge(ChallengeSignal::VendorServer("cloudflare".into()))
        );
        assert!(classify(301, &h(&[("server", "DDoS-Guard")]), None).is_challenge());
    }

    #[test]
    fn vendor_server_on_403() {
        let headers = h(&[("Server", "cloudflare")]);
        assert_eq!(
            classify(403, &headers, None),
            Classification::Challenge(ChallengeSignal::VendorServer("cloudflare".into()))
        );
    }

    #[test]
    fn vendor_header_on_503() {
        let headers = h(&[("X-Sucuri-ID", "12345")]);
        assert_eq!(
            classify(503, &headers, None),
            Classification::Challenge(ChallengeSignal::VendorHeader("x-sucuri-id".into()))
        );
        assert_eq!(classify(503, &[], None), Classification::Page);
    }

    #[test]
    fn bare_429_is_challenge() {
        assert_eq!(
            classify(429, &[], None),
            Classification::Challenge(ChallengeSignal::Status(429))
        );
    }

    #[test]
    fn english_body_marker_on_200() {
        let body = "<title>Just a moment...</title><div>Checking your browser</div>";
        assert!(classify(200, &[], Some(body)).is_challenge());
    }

    #[test]
    fn german_body_marker_is_case_insensitive() {
        let body = "<p>Bitte BESTÄTIGEN SIE, DASS SIE EIN MENSCH SIND.</p>";
        assert_eq!(
            classify(200, &[], Some(body)),
            Classification::Challenge(ChallengeSignal::BodyMarker(
                "bestätigen sie, dass sie ein mensch sind"
            ))
        );
    }

    #[test]
    fn not_found_is_page() {
        assert_eq!(classify(404, &h(&[("Server", "nginx")]), Some("Not found")), Classification::Page);
    }
}
