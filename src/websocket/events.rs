//! Observer lists for connection lifecycle events.
//!
//! Observers run synchronously on the task that raised the event. A panicking
//! observer is logged and skipped; it never affects the connection or the
//! observers after it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use super::error::TransportError;

type Observers<F> = RwLock<Vec<Arc<F>>>;

#[derive(Default)]
pub(crate) struct EventHub {
    connected: Observers<dyn Fn() + Send + Sync>,
    text: Observers<dyn Fn(&str) + Send + Sync>,
    binary: Observers<dyn Fn(&[u8]) + Send + Sync>,
    error: Observers<dyn Fn(&TransportError) + Send + Sync>,
    closed: Observers<dyn Fn(u16) + Send + Sync>,
}

impl EventHub {
    pub fn on_connected(&self, f: Arc<dyn Fn() + Send + Sync>) {
        subscribe(&self.connected, f);
    }

    pub fn on_text(&self, f: Arc<dyn Fn(&str) + Send + Sync>) {
        subscribe(&self.text, f);
    }

    pub fn on_binary(&self, f: Arc<dyn Fn(&[u8]) + Send + Sync>) {
        subscribe(&self.binary, f);
    }

    pub fn on_error(&self, f: Arc<dyn Fn(&TransportError) + Send + Sync>) {
        subscribe(&self.error, f);
    }

    pub fn on_closed(&self, f: Arc<dyn Fn(u16) + Send + Sync>) {
        subscribe(&self.closed, f);
    }

    pub fn connected(&self, id: Uuid) {
        fire(&self.connected, id, "connected", |f| f());
    }

    pub fn text(&self, id: Uuid, text: &str) {
        fire(&self.text, id, "text_received", |f| f(text));
    }

    pub fn binary(&self, id: Uuid, data: &[u8]) {
        fire(&self.binary, id, "binary_received", |f| f(data));
    }

    pub fn error(&self, id: Uuid, error: &TransportError) {
        fire(&self.error, id, "error", |f| f(error));
    }

    pub fn closed(&self, id: Uuid, code: u16) {
        fire(&self.closed, id, "closed", |f| f(code));
    }
}

fn subscribe<F: ?Sized>(list: &Observers<F>, f: Arc<F>) {
    list.write().unwrap_or_else(PoisonError::into_inner).push(f);
}

fn fire<F: ?Sized>(list: &Observers<F>, id: Uuid, event: &'static str, invoke: impl Fn(&F)) {
    // Snapshot so observers may subscribe more observers
    let observers: Vec<Arc<F>> = list
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    for observer in &observers {
        if catch_unwind(AssertUnwindSafe(|| invoke(&**observer))).is_err() {
            tracing::warn!(connection_id = %id, event = event, "Connection observer panicked");
        }
    }
}
