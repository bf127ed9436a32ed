pub(crate) mod core;
pub(crate) mod error;
pub(crate) mod sync_promise;

pub use crate::core::{Function, Object, Value, arg, format_number, value_to_string};
pub use error::PromiseError;
pub use sync_promise::{PromiseState, Reaction, Rejecter, Resolver, SyncPromise};
