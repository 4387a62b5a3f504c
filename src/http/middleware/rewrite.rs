//! Path rewriting: replace, strip prefix, add prefix.
//!
//! Used for rule-recorded rewrites (`PathPrefixStrip`, `AddPrefix`,
//! `ReplacePath`...) and for the `strip_prefix` / `add_prefix` middlewares.

use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderName, HeaderValue, Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::middleware::{Middleware, Next};
use crate::routing::rule::PathRewrite;

pub const X_FORWARDED_PREFIX: HeaderName = HeaderName::from_static("x-forwarded-prefix");
pub const X_REPLACED_PATH: HeaderName = HeaderName::from_static("x-replaced-path");

#[derive(Debug, Clone)]
pub struct PathRewriter {
    rewrite: PathRewrite,
}

impl PathRewriter {
    pub fn new(mut rewrite: PathRewrite) -> Self {
        rewrite.strip_prefixes.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { rewrite }
    }

    /// Rewrite the request path in place.
    pub fn apply<B>(&self, req: &mut Request<B>) {
        let original = req.uri().path().to_string();
        let mut path = original.clone();

        if let Some(replacement) = &self.rewrite.replace_path {
            if let Ok(value) = HeaderValue::from_str(&original) {
                req.headers_mut().insert(X_REPLACED_PATH, value);
            }
            path = replacement.clone();
        }

        if let Some(prefix) = self
            .rewrite
            .strip_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
        {
            path = ensure_leading_slash(&path[prefix.len()..]);
            if let Ok(value) = HeaderValue::from_str(prefix) {
                req.headers_mut().insert(X_FORWARDED_PREFIX, value);
            }
        }

        if let Some(prefix) = &self.rewrite.add_prefix {
            let prefix = ensure_leading_slash(prefix.trim_end_matches('/'));
            path = if prefix == "/" {
                path
            } else {
                format!("{prefix}{path}")
            };
        }

        if path != original {
            set_path(req.uri_mut(), &path);
        }
    }
}

impl Middleware for PathRewriter {
    fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        self.apply(&mut req);
        next.run(req)
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn set_path(uri: &mut Uri, path: &str) {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let Ok(path_and_query) = path_and_query.parse::<PathAndQuery>() else {
        tracing::warn!(path = %path, "Rewritten path is not a valid URI path, keeping original");
        return;
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    if let Ok(rewritten) = Uri::from_parts(parts) {
        *uri = rewritten;
    }
}
