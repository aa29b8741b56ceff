//! Proxy authentication extension point.
//!
//! The HTTP inbound runs unauthenticated by default; nothing registers
//! an authenticator. The machinery is here for deployments that need it:
//! a verifier interface plus a bounded cache keyed on the raw
//! `Proxy-Authorization` value so repeated requests skip the decode and
//! verify work.

use super::message::{set_header, simple_response, Request, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::debug;

/// Validates proxy credentials
pub trait ProxyAuthenticator: Debug + Send + Sync {
    /// Whether the username/password pair is acceptable
    fn verify(&self, user: &str, pass: &str) -> bool;
}

/// Bounded verdict cache keyed by the raw `Proxy-Authorization` value
#[derive(Debug)]
pub struct AuthCache {
    entries: HashMap<String, bool>,
    capacity: usize,
}

impl AuthCache {
    /// Create a cache holding at most `capacity` verdicts
    pub fn new(capacity: usize) -> Self {
        AuthCache {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Cached verdict for a credential, if any
    pub fn get(&self, credential: &str) -> Option<bool> {
        self.entries.get(credential).copied()
    }

    /// Record a verdict, discarding all cached verdicts when full
    pub fn set(&mut self, credential: String, authed: bool) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&credential) {
            debug!("auth cache full, discarding {} entries", self.entries.len());
            self.entries.clear();
        }
        self.entries.insert(credential, authed);
    }
}

/// Decode a `Basic` credential into username and password
pub fn decode_basic_credentials(value: &str) -> Option<(String, String)> {
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Check a request against the authenticator.
///
/// Returns `None` when the request is trusted, or the response to send
/// instead of proxying: 407 with a `Basic` challenge when credentials
/// are missing, 403 when they are wrong.
pub fn authenticate(
    authenticator: &dyn ProxyAuthenticator,
    cache: &mut AuthCache,
    req: &Request,
) -> Option<Response> {
    let Some(credential) = req.header("Proxy-Authorization") else {
        let mut resp = simple_response(req.version, 407);
        set_header(&mut resp.headers, "Proxy-Authenticate", "Basic");
        return Some(resp);
    };

    let authed = match cache.get(credential) {
        Some(verdict) => verdict,
        None => {
            let verdict = decode_basic_credentials(credential)
                .map(|(user, pass)| authenticator.verify(&user, &pass))
                .unwrap_or(false);
            cache.set(credential.to_string(), verdict);
            verdict
        }
    };

    if authed {
        None
    } else {
        Some(simple_response(req.version, 403))
    }
}
