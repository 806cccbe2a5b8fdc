//! Error boundary: the outermost wrapper before a function reaches the host.
//!
//! Errors and panics never cross into the host. They are turned into host
//! error values instead.

use crate::callable::Callable;
use crate::value::{ErrorCode, HostError, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Wrap `callable` so that it always returns a value.
pub fn guard(name: &str, callable: Callable) -> Callable {
    let name = name.to_string();
    let params = callable.params().to_vec();
    let returns = callable.returns().clone();
    Callable::new(params, returns, move |args| {
        match panic::catch_unwind(AssertUnwindSafe(|| callable.call(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(function = %name, code = %e.code, "{}", e.message);
                Ok(Value::Error(e.into_host()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(function = %name, "panicked: {message}");
                Ok(Value::Error(HostError::new(ErrorCode::Value, message)))
            }
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "function panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::CallError;
    use crate::types::Type;

    #[test]
    fn test_errors_become_values() {
        let failing = Callable::new(vec![], Type::Number, |_| {
            Err(CallError::new(ErrorCode::Num, "out of range"))
        });
        let guarded = guard("Failing", failing);
        assert_eq!(
            guarded.call(vec![]),
            Ok(Value::Error(HostError::new(ErrorCode::Num, "out of range")))
        );
    }

    #[test]
    fn test_panics_become_values() {
        let panicking = Callable::new(vec![], Type::Number, |_| panic!("kaboom"));
        let guarded = guard("Panicking", panicking);
        assert_eq!(
            guarded.call(vec![]),
            Ok(Value::Error(HostError::new(ErrorCode::Value, "kaboom")))
        );
    }

    #[test]
    fn test_success_passes_through() {
        let ok = Callable::new(vec![Type::Number], Type::Number, |mut a| Ok(a.remove(0)));
        assert_eq!(guard("Ok", ok).call(vec![Value::Number(1.0)]), Ok(Value::Number(1.0)));
    }
}
