//! HTTP basic authentication.

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::future::BoxFuture;

use crate::config::dynamic::BasicAuthSpec;
use crate::http::middleware::{Middleware, Next};
use crate::http::response::status_response;

const DEFAULT_REALM: &str = "edge-router";

#[derive(Debug, Clone)]
struct User {
    name: String,
    password: String,
}

/// Checks `Authorization: Basic` against a fixed user list.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    users: Vec<User>,
    challenge: HeaderValue,
    remove_header: bool,
}

impl BasicAuth {
    pub fn from_spec(spec: &BasicAuthSpec) -> Result<Self, String> {
        let users = spec
            .users
            .iter()
            .map(|entry| {
                entry
                    .split_once(':')
                    .filter(|(name, _)| !name.is_empty())
                    .map(|(name, password)| User {
                        name: name.to_string(),
                        password: password.to_string(),
                    })
                    .ok_or_else(|| format!("user entry {entry:?} is not user:password"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if users.is_empty() {
            return Err("no users configured".to_string());
        }

        let realm = spec.realm.as_deref().unwrap_or(DEFAULT_REALM);
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
            .map_err(|e| format!("invalid realm: {e}"))?;

        Ok(Self {
            users,
            challenge,
            remove_header: spec.remove_header,
        })
    }

    /// Returns the authenticated user name.
    fn authenticate<B>(&self, req: &Request<B>) -> Option<&str> {
        let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (name, password) = decoded.split_once(':')?;

        self.users
            .iter()
            .find(|user| {
                user.name == name && constant_time_eq(user.password.as_bytes(), password.as_bytes())
            })
            .map(|user| user.name.as_str())
    }

    fn challenge(&self) -> Response {
        let mut response = status_response(StatusCode::UNAUTHORIZED);
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, self.challenge.clone());
        response
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl Middleware for BasicAuth {
    fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        match self.authenticate(&req).map(str::to_owned) {
            Some(user) => {
                tracing::debug!(user = %user, "Authenticated");
                if self.remove_header {
                    req.headers_mut().remove(AUTHORIZATION);
                }
                next.run(req)
            }
            None => {
                let response = self.challenge();
                Box::pin(async move { response })
            }
        }
    }
}
