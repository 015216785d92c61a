//! Functions predefined in the global environment.

use std::io::prelude::*;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::eval::RuntimeErrorKind;
use crate::heap::{Heap, ListId};
use crate::value::{stringify, Native, Value};

/// Run `native`.  The caller has already checked the argument count.
pub fn call<W: Write>(
    native: Native,
    args: &[Value],
    heap: &mut Heap,
    output: &mut W,
) -> Result<Value, RuntimeErrorKind> {
    match (native, args) {
        (Native::Clock, []) => Ok(Value::Number(clock())),
        (Native::Print, [value]) => {
            writeln!(output, "{}", stringify(value, heap))?;
            Ok(Value::Nil)
        }
        (Native::Len, [list]) => {
            let id = list_arg(list)?;
            Ok(Value::Number(heap.list(id).len() as f64))
        }
        (Native::Append, [list, value]) => {
            let id = list_arg(list)?;
            heap.list_mut(id).push(value.clone());
            Ok(Value::Nil)
        }
        (Native::Pop, [list]) => {
            let id = list_arg(list)?;
            heap.list_mut(id).pop().ok_or(RuntimeErrorKind::EmptyList)
        }
        _ => Err(RuntimeErrorKind::Arity {
            expected: native.arity(),
            got: args.len(),
        }),
    }
}

/// Seconds since the Unix epoch.
fn clock() -> f64 {
    // A clock set before the epoch reads as the epoch.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn list_arg(value: &Value) -> Result<ListId, RuntimeErrorKind> {
    match value {
        Value::List(id) => Ok(*id),
        _ => Err(RuntimeErrorKind::ListArgument),
    }
}
