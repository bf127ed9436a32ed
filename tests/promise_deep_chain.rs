use sync_promise::{PromiseState, SyncPromise, Value};

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn add_one(x: Value) -> Result<Value, Value> {
    Ok(Value::Number(x.as_number().unwrap_or_default() + 1.0))
}

#[cfg(test)]
mod deep_chain_tests {
    use super::*;

    #[test]
    fn test_deep_chain_on_settled_root() {
        // Every step returns a fresh promise resolving to the previous value + 1.
        let depth = 200;
        let mut p = SyncPromise::resolve(0);
        for _ in 0..depth {
            p = p.and_then(|x| Ok(SyncPromise::resolve(add_one(x)?).into()));
        }
        assert_eq!(p.state(), PromiseState::Resolved(Value::Number(depth as f64)));
    }

    #[test]
    fn test_deep_chain_on_pending_root() {
        let depth = 200;
        let (root, resolve, _) = SyncPromise::with_capability();
        let mut p = root.clone();
        for _ in 0..depth {
            p = p.and_then(add_one);
        }
        assert!(p.is_pending());
        resolve.resolve(0);
        assert_eq!(p.state(), PromiseState::Resolved(Value::Number(depth as f64)));
    }

    #[test]
    fn test_rejection_skips_the_rest_of_the_chain() {
        let mut p = SyncPromise::resolve(0).and_then(|_| Err(Value::from("halt")));
        for _ in 0..50 {
            p = p.and_then(add_one);
        }
        let p = p.catch(|reason| Ok(Value::from(format!("recovered from {reason}"))));
        assert_eq!(p.state(), PromiseState::Resolved("recovered from halt".into()));
    }

    #[test]
    fn test_promise_then_with_closure() {
        let multiplier = 3.0;
        let offset = 10.0;
        let p = SyncPromise::resolve(5)
            .and_then(move |x| Ok(Value::Number(x.as_number().unwrap_or_default() * multiplier)))
            .and_then(move |y| Ok(Value::Number(y.as_number().unwrap_or_default() + offset)));
        assert_eq!(p.state(), PromiseState::Resolved(Value::Number(25.0)));
    }
}
