//! Receptors every courier endpoint can offer

use crate::receptor::{ParamSpec, ReceptorRegistry};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Register `ping` and `echo`.
///
/// - `ping {init: i64}` returns milliseconds elapsed since `init`, never
///   negative.
/// - `echo {value: any}` returns `value`.
pub fn register_builtins(registry: &mut ReceptorRegistry) -> &mut ReceptorRegistry {
    registry
        .register("ping", vec![ParamSpec::of::<i64>("init")], |mut args| async move {
            let init: i64 = args.take("init")?;
            Ok(now_millis().saturating_sub(init).max(0))
        })
        .register("echo", vec![ParamSpec::of::<Value>("value")], |mut args| async move {
            let value: Value = args.take("value")?;
            Ok(value)
        })
}
