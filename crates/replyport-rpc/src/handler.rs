use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::sync::{read, write};

/// What a handler produces: a result value, or an error message that is
/// sent back to the caller verbatim.
pub type HandlerResult = std::result::Result<Value, String>;

/// A registered handler.
pub type Handler = Arc<dyn Fn(CallContext, Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Per-call information handed to a handler alongside its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Call or event name.
    pub name: String,
    /// Present for calls that expect a reply.
    pub correlation_id: Option<String>,
    /// Who sent it, when the endpoint knows (the peer id on a hub).
    pub origin: Option<String>,
}

impl CallContext {
    pub fn expects_reply(&self) -> bool {
        self.correlation_id.is_some()
    }
}

/// Call name to handler map. Cloning shares the table, so one table can
/// serve many endpoints.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any previous one. Returns
    /// true if a handler was replaced.
    pub fn on<F, Fut>(&self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |ctx: CallContext, args: Vec<Value>| -> BoxFuture<'static, HandlerResult> {
                Box::pin(handler(ctx, args))
            },
        );
        self.insert(name, handler)
    }

    /// Register an already boxed handler.
    pub fn insert(&self, name: impl Into<String>, handler: Handler) -> bool {
        let name = name.into();
        let replaced = write(&self.handlers).insert(name.clone(), handler).is_some();
        if replaced {
            tracing::debug!(%name, "replaced handler");
        }
        replaced
    }

    /// Remove the handler for `name`. Returns whether one was registered.
    pub fn off(&self, name: &str) -> bool {
        write(&self.handlers).remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        read(&self.handlers).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.handlers).contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.handlers).keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn clear(&self) {
        write(&self.handlers).clear();
    }

    pub fn len(&self) -> usize {
        read(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn last_registration_wins() {
        let table = HandlerTable::new();
        assert!(!table.on("greet", |_, _| async { Ok(json!("first")) }));
        assert!(table.on("greet", |_, _| async { Ok(json!("second")) }));
        assert_eq!(table.len(), 1);

        let handler = table.get("greet").unwrap();
        let out = handler(CallContext::default(), vec![]).await;
        assert_eq!(out, Ok(json!("second")));
    }

    #[test]
    fn off_removes() {
        let table = HandlerTable::new();
        table.on("a", |_, _| async { Ok(Value::Null) });
        table.on("b", |_, _| async { Ok(Value::Null) });
        assert_eq!(table.names(), vec!["a", "b"]);
        assert!(table.off("a"));
        assert!(!table.off("a"));
        assert!(!table.contains("a"));
    }

    #[test]
    fn clones_share_the_table() {
        let table = HandlerTable::new();
        let shared = table.clone();
        shared.on("x", |_, _| async { Ok(Value::Null) });
        assert!(table.contains("x"));
    }

    #[tokio::test]
    async fn handler_sees_context_and_args() {
        let table = HandlerTable::new();
        table.on("whoami", |ctx, args| async move {
            Ok(json!({ "origin": ctx.origin, "argc": args.len(), "reply": ctx.expects_reply() }))
        });
        let ctx = CallContext {
            name: "whoami".into(),
            correlation_id: Some("1".into()),
            origin: Some("browser-1".into()),
        };
        let out = table.get("whoami").unwrap()(ctx, vec![json!(1), json!(2)]).await;
        assert_eq!(
            out,
            Ok(json!({ "origin": "browser-1", "argc": 2, "reply": true }))
        );
    }
}
