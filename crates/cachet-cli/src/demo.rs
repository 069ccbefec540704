//! Functions the `cachet` binary knows how to run.

use cachet_sdk::{pure_fn, FunctionError, FunctionIdentity, FunctionRegistry, RawArgs, Value};

const VERSION: &str = "1";

fn identity(name: &str) -> anyhow::Result<FunctionIdentity> {
    Ok(FunctionIdentity::new(name, VERSION)?)
}

fn nested(name: &str, n: i64) -> Result<(FunctionIdentity, RawArgs), FunctionError> {
    let function = FunctionIdentity::new(name, VERSION)
        .map_err(|e| FunctionError::new("RuntimeError", e.to_string()))?;
    Ok((function, RawArgs::new().with("n", n)?))
}

fn as_int(value: &Value) -> Result<i64, FunctionError> {
    value
        .as_int()
        .ok_or_else(|| FunctionError::new("TypeError", format!("expected int, got {}", value.type_name())))
}

pub fn registry() -> anyhow::Result<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();

    registry.register(pure_fn(identity("factorial")?, |ctx, args| {
        let n = args.int("n")?;
        if n < 0 {
            return Err(FunctionError::new("ValueError", format!("factorial of negative {n}")));
        }
        if n <= 1 {
            return Ok(Value::from(1i64));
        }
        let (function, below) = nested("factorial", n - 1)?;
        let below = as_int(&ctx.call(&function, &below)?)?;
        n.checked_mul(below)
            .map(Value::from)
            .ok_or_else(|| FunctionError::new("OverflowError", format!("factorial({n}) overflows")))
    }))?;

    registry.register(pure_fn(identity("fibonacci")?, |ctx, args| {
        let n = args.int("n")?;
        if n < 0 {
            return Err(FunctionError::new("ValueError", format!("fibonacci of negative {n}")));
        }
        if n < 2 {
            return Ok(Value::from(n));
        }
        let (function, one) = nested("fibonacci", n - 1)?;
        let (_, two) = nested("fibonacci", n - 2)?;
        let sum = as_int(&ctx.call(&function, &one)?)?
            .checked_add(as_int(&ctx.call(&function, &two)?)?)
            .ok_or_else(|| FunctionError::new("OverflowError", format!("fibonacci({n}) overflows")))?;
        ctx.print(format!("fibonacci({n}) = {sum}"));
        Ok(Value::from(sum))
    }))?;

    registry.register(pure_fn(identity("fail")?, |ctx, args| {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("requested failure")
            .to_string();
        ctx.log_event("failing on request", serde_json::json!({ "message": message }));
        Err(FunctionError::new("ValueError", message))
    }))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_sdk::Cachet;

    fn n(value: i64) -> RawArgs {
        RawArgs::new().with("n", value).unwrap()
    }

    #[test]
    fn registers_three_functions() {
        let names: Vec<_> = registry()
            .unwrap()
            .identities()
            .iter()
            .map(|id| id.name().to_string())
            .collect();
        assert_eq!(names, vec!["factorial", "fail", "fibonacci"]);
    }

    #[test]
    fn factorial_and_fibonacci_compute() {
        let cachet = Cachet::in_memory(registry().unwrap()).unwrap();
        let fact = cachet.signature_for("factorial", &n(10)).unwrap();
        assert_eq!(cachet.run(&fact).unwrap(), Value::from(3_628_800i64));
        let fib = cachet.signature_for("fibonacci", &n(30)).unwrap();
        assert_eq!(cachet.run(&fib).unwrap(), Value::from(832_040i64));
    }

    #[test]
    fn factorial_overflow_is_a_crash() {
        let cachet = Cachet::in_memory(registry().unwrap()).unwrap();
        let sig = cachet.signature_for("factorial", &n(30)).unwrap();
        let err = cachet.run(&sig).unwrap_err();
        assert_eq!(err.kind(), cachet_types::ErrorKind::ExecutionCrash);
    }

    #[test]
    fn fail_always_crashes() {
        let cachet = Cachet::in_memory(registry().unwrap()).unwrap();
        let args = RawArgs::new().with("message", "boom").unwrap();
        let sig = cachet.signature_for("fail", &args).unwrap();
        assert!(cachet.run(&sig).is_err());
        let crashes = cachet.crash_history(None).unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].message, "boom");
    }
}
