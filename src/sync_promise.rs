//! # Synchronous Promise
//!
//! A thenable that settles and runs its continuations inline, in the
//! caller's control flow. There is no task queue: `then` on a settled
//! instance fires before it returns, and settling an instance fires every
//! continuation registered so far before the settling call returns.
//!
//! ## Lifecycle
//!
//! 1. An instance starts `Pending` and settles at most once (first settlement wins).
//! 2. Settling with a thenable, through either capability, adopts it: the
//!    instance stays pending and follows the inner thenable's outcome
//!    instead of storing it as a value.
//! 3. Settlement drains the handler queue in registration order. The queue is
//!    detached before dispatch, so a record never fires twice.
//!
//! Continuations report failure by returning `Err(reason)`; that reason
//! becomes the rejection of the dependent instance.

use crate::core::{Function, ThenMethod, Value, value_to_string};
use crate::raise_type_error;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A continuation registered through `then`. `Err` is a thrown value.
pub type Reaction = Box<dyn FnOnce(Value) -> Result<Value, Value>>;

#[derive(Clone, Debug, PartialEq)]
pub enum PromiseState {
    Pending,
    Resolved(Value),
    Rejected(Value),
}

impl PromiseState {
    fn label(&self) -> &'static str {
        match self {
            PromiseState::Pending => "pending",
            PromiseState::Resolved(_) => "resolved",
            PromiseState::Rejected(_) => "rejected",
        }
    }
}

/// One `then` registration. Exactly one side fires, once.
struct Handler {
    on_fulfilled: Option<Box<dyn FnOnce(Value)>>,
    on_rejected: Option<Box<dyn FnOnce(Value)>>,
}

struct PromiseInner {
    id: usize,
    state: PromiseState,
    handlers: Vec<Handler>,
}

static UNIQUE_ID_SEED: AtomicUsize = AtomicUsize::new(1);

fn generate_unique_id() -> usize {
    UNIQUE_ID_SEED.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a synchronous promise. Clones alias the same instance.
#[derive(Clone)]
pub struct SyncPromise(Rc<RefCell<PromiseInner>>);

/// Resolve capability of one instance.
#[derive(Clone, Debug)]
pub struct Resolver {
    promise: SyncPromise,
}

/// Reject capability of one instance.
#[derive(Clone, Debug)]
pub struct Rejecter {
    promise: SyncPromise,
}

impl Resolver {
    pub fn resolve(&self, value: impl Into<Value>) {
        self.promise.settle_fulfilled(value.into());
    }
}

impl Rejecter {
    pub fn reject(&self, reason: impl Into<Value>) {
        self.promise.settle_rejected(reason.into());
    }
}

impl From<Resolver> for Function {
    fn from(resolver: Resolver) -> Self {
        Function::new(move |args| {
            resolver.resolve(crate::core::arg(args, 0));
            Ok(Value::Undefined)
        })
    }
}

impl From<Rejecter> for Function {
    fn from(rejecter: Rejecter) -> Self {
        Function::new(move |args| {
            rejecter.reject(crate::core::arg(args, 0));
            Ok(Value::Undefined)
        })
    }
}

impl SyncPromise {
    /// Runs `initializer` synchronously with this instance's capabilities.
    /// An `Err` returned by the initializer rejects the instance.
    pub fn new<F>(initializer: F) -> SyncPromise
    where
        F: FnOnce(Resolver, Rejecter) -> Result<(), Value>,
    {
        let (promise, resolver, rejecter) = SyncPromise::with_capability();
        if let Err(thrown) = initializer(resolver, rejecter) {
            log::debug!("SyncPromise#{}: initializer threw {}", promise.id(), value_to_string(&thrown));
            promise.settle_rejected(thrown);
        }
        promise
    }

    /// A pending instance together with the capabilities that settle it.
    pub fn with_capability() -> (SyncPromise, Resolver, Rejecter) {
        let promise = SyncPromise(Rc::new(RefCell::new(PromiseInner {
            id: generate_unique_id(),
            state: PromiseState::Pending,
            handlers: Vec::new(),
        })));
        log::trace!("SyncPromise#{}: created", promise.id());
        let resolver = Resolver { promise: promise.clone() };
        let rejecter = Rejecter { promise: promise.clone() };
        (promise, resolver, rejecter)
    }

    pub fn resolve(value: impl Into<Value>) -> SyncPromise {
        let value = value.into();
        SyncPromise::new(move |resolve, _| {
            resolve.resolve(value);
            Ok(())
        })
    }

    pub fn reject(reason: impl Into<Value>) -> SyncPromise {
        let reason = reason.into();
        SyncPromise::new(move |_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Resolves with the settled values of `collection` in input order, or
    /// rejects with the first rejection reason. `collection` must be an array.
    pub fn all(collection: impl Into<Value>) -> SyncPromise {
        let collection = collection.into();
        SyncPromise::new(move |resolve, reject| {
            let items = match collection {
                Value::Array(items) => items,
                other => {
                    log::debug!("SyncPromise::all: expected array, got {}", other.type_name());
                    reject.reject(raise_type_error!("Promise.all requires an array as input."));
                    return Ok(());
                }
            };
            if items.is_empty() {
                resolve.resolve(Value::Array(Vec::new()));
                return Ok(());
            }

            let remaining = Rc::new(Cell::new(items.len()));
            let results = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
            for (index, item) in items.into_iter().enumerate() {
                let remaining = remaining.clone();
                let results = results.clone();
                let resolve = resolve.clone();
                let reject = reject.clone();
                SyncPromise::resolve(item)
                    .and_then(move |value| {
                        results.borrow_mut()[index] = value;
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            resolve.resolve(Value::Array(results.take()));
                        }
                        Ok(Value::Undefined)
                    })
                    .then(
                        None,
                        Some(Box::new(move |reason: Value| -> Result<Value, Value> {
                            reject.reject(reason);
                            Ok(Value::Undefined)
                        })),
                    );
            }
            Ok(())
        })
    }

    /// Registers continuations and returns the instance that settles with
    /// their outcome. A missing continuation passes the parent's outcome
    /// through unchanged.
    pub fn then(&self, on_fulfilled: Option<Reaction>, on_rejected: Option<Reaction>) -> SyncPromise {
        let (child, resolver, rejecter) = SyncPromise::with_capability();
        let (fulfil_resolver, fulfil_rejecter) = (resolver.clone(), rejecter.clone());
        self.attach_handler(Handler {
            on_fulfilled: Some(Box::new(move |value: Value| match on_fulfilled {
                Some(reaction) => settle_with(reaction(value), &fulfil_resolver, &fulfil_rejecter),
                None => fulfil_resolver.resolve(value),
            })),
            on_rejected: Some(Box::new(move |reason: Value| match on_rejected {
                Some(reaction) => settle_with(reaction(reason), &resolver, &rejecter),
                None => rejecter.reject(reason),
            })),
        });
        child
    }

    pub fn and_then<F>(&self, on_fulfilled: F) -> SyncPromise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then(Some(Box::new(on_fulfilled)), None)
    }

    pub fn then_or_else<F, R>(&self, on_fulfilled: F, on_rejected: R) -> SyncPromise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    pub fn catch<R>(&self, on_rejected: R) -> SyncPromise
    where
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then(Some(Box::new(Ok::<Value, Value>)), Some(Box::new(on_rejected)))
    }

    /// Runs `on_finally` once the parent settles, then replays the parent's
    /// outcome. If `on_finally` fails, its reason replaces the outcome.
    /// Pass `|| Ok(())` where no cleanup is needed.
    pub fn finally<F>(&self, on_finally: F) -> SyncPromise
    where
        F: FnOnce() -> Result<(), Value> + 'static,
    {
        let on_finally = Rc::new(Cell::new(Some(on_finally)));
        let recorded = Rc::new(RefCell::new(PromiseState::Pending));

        let run = move || match on_finally.take() {
            Some(f) => f().map(|()| Value::Undefined),
            None => Ok(Value::Undefined),
        };
        let run_on_reject = run.clone();
        let (on_value, on_reason) = (recorded.clone(), recorded.clone());

        self.then_or_else(
            move |value| {
                *on_value.borrow_mut() = PromiseState::Resolved(value);
                run()
            },
            move |reason| {
                *on_reason.borrow_mut() = PromiseState::Rejected(reason);
                run_on_reject()
            },
        )
        .and_then(move |_| match recorded.replace(PromiseState::Pending) {
            PromiseState::Rejected(reason) => Err(reason),
            PromiseState::Resolved(value) => Ok(value),
            PromiseState::Pending => Ok(Value::Undefined),
        })
    }

    pub fn state(&self) -> PromiseState {
        self.0.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.0.borrow().state, PromiseState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.0.borrow().state, PromiseState::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.0.borrow().state, PromiseState::Rejected(_))
    }

    pub fn id(&self) -> usize {
        self.0.borrow().id
    }

    pub fn ptr_eq(&self, other: &SyncPromise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn settle_fulfilled(&self, value: Value) {
        if !self.is_pending() {
            log::trace!("SyncPromise#{}: already settled, ignoring resolve", self.id());
            return;
        }
        if let Some(then) = value.then_method() {
            self.adopt(then);
            return;
        }
        self.transition(PromiseState::Resolved(value));
    }

    // A thenable reason is followed like a resolution value, so the
    // instance may still end up resolved.
    fn settle_rejected(&self, reason: Value) {
        if !self.is_pending() {
            log::trace!("SyncPromise#{}: already settled, ignoring reject", self.id());
            return;
        }
        if let Some(then) = reason.then_method() {
            self.adopt(then);
            return;
        }
        self.transition(PromiseState::Rejected(reason));
    }

    fn transition(&self, state: PromiseState) {
        {
            let mut inner = self.0.borrow_mut();
            match &state {
                PromiseState::Resolved(value) => {
                    log::debug!("SyncPromise#{}: resolved with {}", inner.id, value_to_string(value));
                }
                PromiseState::Rejected(reason) => {
                    log::debug!("SyncPromise#{}: rejected with {}", inner.id, value_to_string(reason));
                }
                PromiseState::Pending => {}
            }
            inner.state = state;
        }
        self.execute_handlers();
    }

    // No cycle guard: an instance that ends up following itself stays pending.
    fn adopt(&self, then: ThenMethod) {
        let resolver = Resolver { promise: self.clone() };
        let rejecter = Rejecter { promise: self.clone() };
        match then {
            ThenMethod::Native(inner) => {
                log::trace!("SyncPromise#{}: adopting SyncPromise#{}", self.id(), inner.id());
                inner.attach_handler(Handler {
                    on_fulfilled: Some(Box::new(move |value: Value| resolver.resolve(value))),
                    on_rejected: Some(Box::new(move |reason: Value| rejecter.reject(reason))),
                });
            }
            ThenMethod::Foreign(then_fn) => {
                log::trace!("SyncPromise#{}: adopting foreign thenable", self.id());
                let args = [Value::Function(resolver.into()), Value::Function(rejecter.into())];
                if let Err(thrown) = then_fn.call(&args) {
                    log::debug!("SyncPromise#{}: thenable's then threw {}", self.id(), value_to_string(&thrown));
                    self.settle_rejected(thrown);
                }
            }
        }
    }

    fn attach_handler(&self, handler: Handler) {
        {
            let mut inner = self.0.borrow_mut();
            inner.handlers.push(handler);
            log::trace!("SyncPromise#{}: handler attached, queue_len={}", inner.id, inner.handlers.len());
        }
        self.execute_handlers();
    }

    fn execute_handlers(&self) {
        // Detach the queue first: continuations may register more handlers
        // on this instance, which then drain through their own call.
        let (id, outcome, handlers) = {
            let mut inner = self.0.borrow_mut();
            let outcome = match &inner.state {
                PromiseState::Pending => return,
                PromiseState::Resolved(value) => Ok(value.clone()),
                PromiseState::Rejected(reason) => Err(reason.clone()),
            };
            if inner.handlers.is_empty() {
                return;
            }
            (inner.id, outcome, std::mem::take(&mut inner.handlers))
        };
        log::trace!("SyncPromise#{id}: draining {} handlers", handlers.len());
        for handler in handlers {
            match &outcome {
                Ok(value) => {
                    if let Some(on_fulfilled) = handler.on_fulfilled {
                        on_fulfilled(value.clone());
                    }
                }
                Err(reason) => {
                    if let Some(on_rejected) = handler.on_rejected {
                        on_rejected(reason.clone());
                    }
                }
            }
        }
    }
}

fn settle_with(outcome: Result<Value, Value>, resolver: &Resolver, rejecter: &Rejecter) {
    match outcome {
        Ok(value) => resolver.resolve(value),
        Err(thrown) => rejecter.reject(thrown),
    }
}

impl fmt::Display for SyncPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[object SyncPromise]")
    }
}

impl fmt::Debug for SyncPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(inner) => write!(
                f,
                "SyncPromise {{ id: {}, state: {}, handlers: {} }}",
                inner.id,
                inner.state.label(),
                inner.handlers.len()
            ),
            Err(_) => f.write_str("SyncPromise { <borrowed> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let (promise, resolve, _) = SyncPromise::with_capability();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = log.clone();
            promise.and_then(move |_| {
                log.borrow_mut().push(tag);
                Ok(Value::Undefined)
            });
        }
        assert!(log.borrow().is_empty());
        resolve.resolve(1);
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_queue_is_empty_after_drain() {
        let (promise, resolve, _) = SyncPromise::with_capability();
        promise.and_then(Ok);
        promise.catch(Ok);
        assert_eq!(promise.0.borrow().handlers.len(), 2);
        resolve.resolve("done");
        assert!(promise.0.borrow().handlers.is_empty());
    }

    #[test]
    fn test_reentrant_registration_fires_once() {
        let promise = SyncPromise::resolve(7);
        let calls = Rc::new(Cell::new(0));
        let outer_calls = calls.clone();
        let inner_promise = promise.clone();
        promise.and_then(move |_| {
            outer_calls.set(outer_calls.get() + 1);
            let inner_calls = outer_calls.clone();
            inner_promise.and_then(move |v| {
                inner_calls.set(inner_calls.get() + 10);
                Ok(v)
            });
            Ok(Value::Undefined)
        });
        assert_eq!(calls.get(), 11);
    }

    #[test]
    fn test_thenable_rejection_reason_is_adopted() {
        let outer = SyncPromise::reject(SyncPromise::resolve(1));
        assert_eq!(outer.state(), PromiseState::Resolved(Value::Number(1.0)));

        let outer = SyncPromise::reject(SyncPromise::reject("inner"));
        assert_eq!(outer.state(), PromiseState::Rejected("inner".into()));
    }

    #[test]
    fn test_pending_thenable_rejection_reason_is_followed() {
        let (inner, resolve_inner, _) = SyncPromise::with_capability();
        let outer = SyncPromise::reject(inner);
        assert!(outer.is_pending());
        resolve_inner.resolve("later");
        assert_eq!(outer.state(), PromiseState::Resolved("later".into()));
    }

    #[test]
    fn test_debug_and_display() {
        let promise = SyncPromise::reject("nope");
        assert_eq!(promise.to_string(), "[object SyncPromise]");
        let dbg = format!("{promise:?}");
        assert!(dbg.contains("state: rejected"), "{dbg}");
        assert!(dbg.contains("handlers: 0"), "{dbg}");
    }

    #[test]
    fn test_ids_increase() {
        let a = SyncPromise::resolve(());
        let b = SyncPromise::resolve(());
        assert!(b.id() > a.id());
    }
}
