//! Built-in demo functions
//!
//! The store persists `module.symbol` strings, and a Rust binary cannot
//! import symbols by path at runtime, so the CLI registers this fixed set
//! at startup. Embedders of the library register their own functions the
//! same way.

use serde_json::{json, Value};
use std::time::Duration;

use taskmill_core::{FunctionRegistry, JobInput};

/// Register the demo handler set
pub fn register_builtins(registry: &FunctionRegistry) {
    registry.register_sync("demo.add", |input: JobInput| {
        let a: i64 = input.arg(0)?;
        let b: i64 = input.arg(1)?;
        Ok(json!(a + b))
    });

    registry.register_sync("demo.echo", |input: JobInput| {
        Ok(json!({
            "args": input.args,
            "kwargs": Value::Object(input.kwargs),
        }))
    });

    registry.register_sync("demo.sleep", |input: JobInput| {
        let seconds: u64 = input.arg(0)?;
        std::thread::sleep(Duration::from_secs(seconds));
        Ok(json!(seconds))
    });

    registry.register_sync("demo.fail", |input: JobInput| {
        let message: String = input
            .arg(0)
            .unwrap_or_else(|_| "demo.fail invoked".to_string());
        anyhow::bail!(message)
    });

    registry.register_async("demo.delay_echo", |input: JobInput| async move {
        let millis: u64 = input.arg(0)?;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(json!(format!("slept {millis}ms")))
    });
}
