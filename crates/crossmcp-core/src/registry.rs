//! Typed request and notification handler tables.
//!
//! Request handlers are keyed by method name; re-registration replaces.
//! Notification listeners are append-only per method and invoked in
//! registration order; a [`ListenerHandle`] deregisters its listener when
//! dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crossmcp_protocol::McpResult;

use crate::context::RequestContext;

/// A handler for one inbound request method.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle decoded params, producing a result value or a typed error.
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value>;
}

/// A listener for one inbound notification method.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Observe a notification. Errors are logged by the dispatcher and never
    /// terminate the session.
    async fn handle(&self, params: Option<Value>) -> McpResult<()>;
}

struct FnRequestHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnRequestHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        (self.0)(params, ctx).await
    }
}

/// Wrap a closure as a [`RequestHandler`].
pub fn request_handler<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<Value>> + Send + 'static,
{
    Arc::new(FnRequestHandler(f))
}

struct FnNotificationHandler<F>(F);

#[async_trait]
impl<F, Fut> NotificationHandler for FnNotificationHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<()>> + Send,
{
    async fn handle(&self, params: Option<Value>) -> McpResult<()> {
        (self.0)(params).await
    }
}

/// Wrap a closure as a [`NotificationHandler`].
pub fn notification_handler<F, Fut>(f: F) -> Arc<dyn NotificationHandler>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<()>> + Send + 'static,
{
    Arc::new(FnNotificationHandler(f))
}

type ListenerSlot = (u64, Arc<dyn NotificationHandler>);
type ListenerTable = RwLock<HashMap<String, Vec<ListenerSlot>>>;

/// Handler tables for one peer connection.
#[derive(Default)]
pub struct HandlerRegistry {
    requests: DashMap<String, Arc<dyn RequestHandler>>,
    listeners: Arc<ListenerTable>,
    next_listener_id: std::sync::atomic::AtomicU64,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("request_methods", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a request method.
    pub fn set_request_handler(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.requests.insert(method.into(), handler);
    }

    /// Remove the handler for a request method.
    pub fn remove_request_handler(&self, method: &str) {
        self.requests.remove(method);
    }

    /// Look up the handler for a method.
    pub fn request_handler(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests.get(method).map(|entry| Arc::clone(&*entry))
    }

    /// Append a notification listener; listeners for the same method run in
    /// registration order. Dropping the returned handle deregisters.
    pub fn add_notification_listener(
        &self,
        method: impl Into<String>,
        listener: Arc<dyn NotificationHandler>,
    ) -> ListenerHandle {
        let method = method.into();
        let id = self
            .next_listener_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.listeners
            .write()
            .entry(method.clone())
            .or_default()
            .push((id, listener));
        ListenerHandle {
            method,
            id,
            table: Arc::downgrade(&self.listeners),
        }
    }

    /// Snapshot of the listeners for a method, in registration order.
    pub fn notification_listeners(&self, method: &str) -> Vec<Arc<dyn NotificationHandler>> {
        self.listeners
            .read()
            .get(method)
            .map(|slots| slots.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

/// Registration handle for a notification listener; dropping it removes the
/// listener from the table.
#[derive(Debug)]
pub struct ListenerHandle {
    method: String,
    id: u64,
    table: Weak<ListenerTable>,
}

impl ListenerHandle {
    /// Keep the listener registered for the registry's whole lifetime.
    pub fn forget(mut self) {
        self.table = Weak::new();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            let mut listeners = table.write();
            if let Some(slots) = listeners.get_mut(&self.method) {
                slots.retain(|(id, _)| *id != self.id);
                if slots.is_empty() {
                    listeners.remove(&self.method);
                }
            }
        }
    }
}
