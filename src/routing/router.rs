//! Route tables and per-entry-point dispatch.
//!
//! # Responsibilities
//! - Store compiled routes ordered by priority
//! - Look up the first matching route for a request
//! - Publish new tables atomically on reload
//!
//! # Design Decisions
//! - Tables are immutable; a reload builds a new one and swaps the pointer
//! - Readers never block on a reload (`ArcSwap` load)
//! - Ties in priority keep insertion order (stable sort)
//! - Explicit 404 rather than a silent default route

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;

use crate::http::middleware::Chain;
use crate::http::response::status_response;
use crate::routing::matcher::RuleMatcher;

/// A compiled router bound to its middleware chain.
pub struct RouteEntry {
    pub name: String,
    pub service: String,
    pub priority: i64,
    pub matcher: RuleMatcher,
    pub chain: Arc<Chain>,
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Routes of one entry point, highest priority first.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<RouteEntry>) -> Self {
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    pub fn match_request<B>(&self, req: &Request<B>) -> Option<&RouteEntry> {
        self.routes.iter().find(|route| route.matcher.matches(req))
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The live table of one entry point.
#[derive(Debug)]
pub struct EntryPointRouter {
    name: String,
    table: ArcSwap<RouteTable>,
    generation: AtomicU64,
}

impl EntryPointRouter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: ArcSwap::from_pointee(RouteTable::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current table snapshot.
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Publish a new table.
    pub fn swap(&self, table: RouteTable) {
        let routes = table.len();
        self.table.store(Arc::new(table));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(entry_point = %self.name, routes, generation, "Route table swapped");
    }

    /// Number of tables published so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Route a request through the current table.
    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let table = self.table();
        match table.match_request(&req) {
            Some(route) => {
                let chain = route.chain.clone();
                chain.handle(req).await
            }
            None => {
                tracing::debug!(
                    entry_point = %self.name,
                    path = %req.uri().path(),
                    "No route matched"
                );
                status_response(StatusCode::NOT_FOUND)
            }
        }
    }
}
