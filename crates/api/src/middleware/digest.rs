//! HTTP Digest authentication (RFC 7616, SHA-256) for the admin surface.

use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::AdminCredentials;
use crate::state::AppState;

const REALM: &str = "plinth";

/// Admin-surface guard.
///
/// With admin credentials configured, the request must carry a valid
/// `Authorization: Digest` header (algorithm SHA-256, qop `auth`);
/// anything else is rejected with a 401 challenge. Without configured
/// credentials the surface is open and extraction always succeeds.
///
/// Verification is stateless: nonces are not tracked between the
/// challenge and the follow-up request, so any nonce the client echoes
/// back is accepted as long as the response hash checks out.
#[derive(Debug, Clone, Copy)]
pub struct AdminGuard;

impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = DigestChallenge;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(creds) = state.config.admin.as_ref() else {
            return Ok(AdminGuard);
        };

        let authorized = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|raw| verify(raw, parts.method.as_str(), creds))
            .unwrap_or(false);

        if authorized {
            Ok(AdminGuard)
        } else {
            Err(DigestChallenge::new())
        }
    }
}

/// 401 response carrying a fresh digest challenge.
#[derive(Debug)]
pub struct DigestChallenge {
    nonce: String,
    opaque: String,
}

impl DigestChallenge {
    fn new() -> Self {
        DigestChallenge {
            nonce: random_hex(),
            opaque: random_hex(),
        }
    }
}

impl IntoResponse for DigestChallenge {
    fn into_response(self) -> Response {
        let challenge = format!(
            "Digest realm=\"{REALM}\", qop=\"auth\", algorithm=SHA-256, \
             nonce=\"{}\", opaque=\"{}\"",
            self.nonce, self.opaque
        );
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, challenge)],
            "Unauthorized",
        )
            .into_response()
    }
}

/// Check an `Authorization: Digest ...` header value against the
/// configured credentials.
fn verify(raw: &str, method: &str, creds: &AdminCredentials) -> bool {
    let Some(fields) = raw.strip_prefix("Digest ").map(parse_fields) else {
        return false;
    };
    let (Some(username), Some(realm), Some(nonce), Some(uri), Some(response)) = (
        fields.get("username"),
        fields.get("realm"),
        fields.get("nonce"),
        fields.get("uri"),
        fields.get("response"),
    ) else {
        return false;
    };
    if username != &creds.username {
        return false;
    }

    let ha1 = sha256_hex(&format!("{username}:{realm}:{}", creds.password));
    let ha2 = sha256_hex(&format!("{method}:{uri}"));
    let expected = match (fields.get("qop"), fields.get("nc"), fields.get("cnonce")) {
        (Some(qop), Some(nc), Some(cnonce)) => {
            sha256_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}"))
        }
        // RFC 2069 compatibility form for clients that omit qop.
        _ => sha256_hex(&format!("{ha1}:{nonce}:{ha2}")),
    };
    expected.eq_ignore_ascii_case(response)
}

/// Split `k="v", k2=v2, ...` into a lowercase-keyed map. Quotes are
/// stripped; bare tokens such as `nc=00000001` pass through.
fn parse_fields(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|part| {
            let (key, value) = part.trim().split_once('=')?;
            Some((
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

fn sha256_hex(input: &str) -> String {
    to_hex(&Sha256::digest(input.as_bytes()))
}

fn random_hex() -> String {
    let mut buf = [0u8; 16];
    rand::rng().fill_bytes(&mut buf);
    to_hex(&buf)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AdminCredentials {
        AdminCredentials {
            username: "admin".into(),
            password: "s3cret".into(),
        }
    }

    /// Build the header a well-behaved client would send.
    fn client_header(method: &str, uri: &str, nonce: &str) -> String {
        let ha1 = sha256_hex(&format!("admin:{REALM}:s3cret"));
        let ha2 = sha256_hex(&format!("{method}:{uri}"));
        let response = sha256_hex(&format!("{ha1}:{nonce}:00000001:abcdef:auth:{ha2}"));
        format!(
            "Digest username=\"admin\", realm=\"{REALM}\", nonce=\"{nonce}\", \
             uri=\"{uri}\", qop=auth, nc=00000001, cnonce=\"abcdef\", \
             response=\"{response}\", algorithm=SHA-256"
        )
    }

    #[test]
    fn a_correct_response_hash_verifies() {
        let header = client_header("GET", "/source", "deadbeef");
        assert!(verify(&header, "GET", &creds()));
    }

    #[test]
    fn a_wrong_password_fails() {
        let ha1 = sha256_hex(&format!("admin:{REALM}:wrong"));
        let ha2 = sha256_hex("GET:/source");
        let response = sha256_hex(&format!("{ha1}:n:00000001:abcdef:auth:{ha2}"));
        let header = format!(
            "Digest username=\"admin\", realm=\"{REALM}\", nonce=\"n\", uri=\"/source\", \
             qop=auth, nc=00000001, cnonce=\"abcdef\", response=\"{response}\""
        );
        assert!(!verify(&header, "GET", &creds()));
    }

    #[test]
    fn the_method_is_part_of_the_hash() {
        let header = client_header("GET", "/source", "deadbeef");
        assert!(!verify(&header, "DELETE", &creds()));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(!verify("Bearer xyz", "GET", &creds()));
        assert!(!verify("Digest ", "GET", &creds()));
        assert!(!verify("Digest username=\"admin\"", "GET", &creds()));
    }

    #[test]
    fn field_parsing_strips_quotes_and_lowercases_keys() {
        let fields = parse_fields("Username=\"admin\", NC=00000001, uri=\"/source\"");
        assert_eq!(fields.get("username").map(String::as_str), Some("admin"));
        assert_eq!(fields.get("nc").map(String::as_str), Some("00000001"));
        assert_eq!(fields.get("uri").map(String::as_str), Some("/source"));
    }
}
