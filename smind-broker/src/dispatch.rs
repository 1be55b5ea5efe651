use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use smind_sensor::WireError;
use thiserror::Error;

use crate::{Message, MessagePath};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Wire Error {0}")]
    Wire(#[from] WireError),
    #[error("Worker queue is full")]
    QueueFull,
    #[error("Owning context has shut down")]
    OwnerGone,
    #[error("Handler Error {0}")]
    Other(String),
}

/// Handles inbound messages for exactly one [`MessagePath`].
///
/// Handlers run synchronously on whatever thread the transport delivers
/// on. Anything that must touch state confined to another context has to
/// forward the message there itself (e.g. to an actor mailbox).
pub trait MessageHandler: Send + Sync {
    fn path(&self) -> MessagePath;
    fn handle(&self, msg: &Message) -> Result<(), HandlerError>;
}

/// Single path handler built from a closure
pub struct FnHandler<F> {
    path: MessagePath,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(path: MessagePath, f: F) -> Self {
        Self { path, f }
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn path(&self) -> MessagePath {
        self.path
    }

    fn handle(&self, msg: &Message) -> Result<(), HandlerError> {
        (self.f)(msg)
    }
}

type HandlerTable = HashMap<MessagePath, Vec<Arc<dyn MessageHandler>>>;

/// Routes inbound messages to the handlers registered for their path.
///
/// Registration may race with delivery: the table sits behind a lock and
/// dispatch works on a snapshot of the matching handlers, so handlers
/// never run with the lock held.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HandlerTable>,
}

fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for its path. Returns false if this exact handler was
    /// already registered.
    pub fn register(&self, handler: Arc<dyn MessageHandler>) -> bool {
        let mut table = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let entry = table.entry(handler.path()).or_default();
        if entry.iter().any(|h| same_handler(h, &handler)) {
            log::debug!("Handler for {} already registered", handler.path());
            return false;
        }
        log::debug!("Registering handler for {}", handler.path());
        entry.push(handler);
        true
    }

    /// Remove `handler`. Returns false if it was not registered.
    pub fn unregister(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut table = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.get_mut(&handler.path()) {
            let before = entry.len();
            entry.retain(|h| !same_handler(h, handler));
            if entry.len() != before {
                log::debug!("Unregistered handler for {}", handler.path());
                return true;
            }
        }
        log::warn!("Removing non-existent handler for {}", handler.path());
        false
    }

    pub fn handler_count(&self, path: MessagePath) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the message's path, in
    /// registration order. A failing handler is logged and the rest still
    /// run. Returns how many handlers were invoked.
    pub fn dispatch(&self, msg: &Message) -> usize {
        let path = match msg.message_path() {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Dropping message from {}: {e:}", msg.source_node_id);
                return 0;
            }
        };

        let snapshot = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            log::trace!("No handler for {path:} from {}", msg.source_node_id);
        }

        for handler in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!(
                        "Error handling {path:} from {}: {e:}",
                        msg.source_node_id
                    );
                }
                Err(_) => {
                    log::error!(
                        "Handler for {path:} panicked on message from {}",
                        msg.source_node_id
                    );
                }
            }
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        thread,
    };

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    fn recording(path: MessagePath, tag: &'static str, log: CallLog) -> Arc<dyn MessageHandler> {
        Arc::new(FnHandler::new(path, move |_msg: &Message| {
            log.lock().unwrap().push(tag);
            Ok(())
        }))
    }

    #[test]
    fn only_exact_path_handlers_run() {
        let calls = Arc::new(Mutex::new(vec![]));
        let dispatcher = Dispatcher::new();
        dispatcher.register(recording(MessagePath::SetStatus, "status", calls.clone()));
        dispatcher.register(recording(
            MessagePath::SensorDataRequestResponse,
            "response",
            calls.clone(),
        ));

        let invoked = dispatcher.dispatch(&Message::new(
            MessagePath::SensorDataRequestResponse,
            "{}",
            "watch1",
        ));
        assert_eq!(invoked, 1);
        assert_eq!(*calls.lock().unwrap(), vec!["response"]);

        dispatcher.dispatch(&Message::new(MessagePath::SetStatus, "ok", "watch1"));
        assert_eq!(*calls.lock().unwrap(), vec!["response", "status"]);
    }

    #[test]
    fn registration_is_idempotent() {
        let calls = Arc::new(Mutex::new(vec![]));
        let dispatcher = Dispatcher::new();
        let handler = recording(MessagePath::GetStatus, "a", calls.clone());

        assert!(dispatcher.register(handler.clone()));
        assert!(!dispatcher.register(handler.clone()));
        assert_eq!(dispatcher.handler_count(MessagePath::GetStatus), 1);

        dispatcher.dispatch(&Message::new(MessagePath::GetStatus, "", "hub"));
        assert_eq!(calls.lock().unwrap().len(), 1);

        assert!(dispatcher.unregister(&handler));
        assert!(!dispatcher.unregister(&handler));
        assert_eq!(
            dispatcher.dispatch(&Message::new(MessagePath::GetStatus, "", "hub")),
            0
        );
    }

    #[test]
    fn failing_handler_does_not_stop_others() {
        let calls = Arc::new(Mutex::new(vec![]));
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(FnHandler::new(MessagePath::Closing, |_msg: &Message| {
            Err(HandlerError::Other("boom".to_string()))
        })));
        dispatcher.register(Arc::new(FnHandler::new(MessagePath::Closing, |_msg: &Message| {
            panic!("handler panic")
        })));
        dispatcher.register(recording(MessagePath::Closing, "second", calls.clone()));

        let invoked = dispatcher.dispatch(&Message::new(MessagePath::Closing, "Pixel", "hub"));
        assert_eq!(invoked, 3);
        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(vec![]));
        let dispatcher = Dispatcher::new();
        for tag in ["one", "two", "three"] {
            dispatcher.register(recording(MessagePath::SetStatus, tag, calls.clone()));
        }
        dispatcher.dispatch(&Message::new(MessagePath::SetStatus, "", "hub"));
        assert_eq!(*calls.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn unknown_path_is_dropped() {
        let calls = Arc::new(Mutex::new(vec![]));
        let dispatcher = Dispatcher::new();
        dispatcher.register(recording(MessagePath::SetStatus, "status", calls.clone()));

        assert_eq!(
            dispatcher.dispatch(&Message::raw("/set_status_extra", "", "hub")),
            0
        );
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn registration_races_with_dispatch() {
        const ROUNDS: usize = 500;

        let dispatcher = Arc::new(Dispatcher::new());
        let steady = Arc::new(AtomicUsize::new(0));
        let counter = steady.clone();
        dispatcher.register(Arc::new(FnHandler::new(MessagePath::SetStatus, move |_msg: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let churn = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let transient: Arc<dyn MessageHandler> =
                        Arc::new(FnHandler::new(MessagePath::SetStatus, |_msg: &Message| Ok(())));
                    assert!(dispatcher.register(transient.clone()));
                    assert!(dispatcher.unregister(&transient));
                }
            })
        };
        let dispatch = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let invoked =
                        dispatcher.dispatch(&Message::new(MessagePath::SetStatus, "ok", "watch1"));
                    assert!((1..=2).contains(&invoked), "{invoked}");
                }
            })
        };

        churn.join().unwrap();
        dispatch.join().unwrap();
        assert_eq!(steady.load(Ordering::SeqCst), ROUNDS);
        assert_eq!(dispatcher.handler_count(MessagePath::SetStatus), 1);
    }
}
