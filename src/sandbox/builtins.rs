//! The allow-listed capability table.
//!
//! This is the entire ambient surface visible to executed code: pure
//! length/size queries, type constructors, iteration helpers, sorting,
//! aggregation and formatting. There is deliberately no entry for the
//! filesystem, the network, processes, or any handle into host state, and
//! the table is fixed at compile time; nothing is ever added per request.
//!
//! `print` writes to a captured per-execution buffer, never to process
//! stdout, which is reserved for the result envelope.

use super::eval::Interpreter;
use super::value::{compare, Value};
use crate::error::SandboxError;

pub type BuiltinFn = fn(&mut Interpreter, Vec<Value>) -> Result<Value, SandboxError>;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "len", func: len },
    Builtin { name: "str", func: to_str },
    Builtin { name: "int", func: to_int },
    Builtin { name: "float", func: to_float },
    Builtin { name: "bool", func: to_bool },
    Builtin { name: "abs", func: abs },
    Builtin { name: "round", func: round },
    Builtin { name: "min", func: min },
    Builtin { name: "max", func: max },
    Builtin { name: "sum", func: sum },
    Builtin { name: "sorted", func: sorted },
    Builtin { name: "range", func: range },
    Builtin { name: "enumerate", func: enumerate },
    Builtin { name: "zip", func: zip },
    Builtin { name: "map", func: map_fn },
    Builtin { name: "filter", func: filter_fn },
    Builtin { name: "keys", func: keys },
    Builtin { name: "values", func: values },
    Builtin { name: "push", func: push },
    Builtin { name: "contains", func: contains },
    Builtin { name: "join", func: join },
    Builtin { name: "split", func: split },
    Builtin { name: "upper", func: upper },
    Builtin { name: "lower", func: lower },
    Builtin { name: "repeat", func: repeat },
    Builtin { name: "print", func: print },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

fn arity_error(name: &str, expected: &str, got: usize) -> SandboxError {
    SandboxError::Runtime(format!("{name} expects {expected} argument(s), got {got}"))
}

fn type_error(name: &str, expected: &str, got: &Value) -> SandboxError {
    SandboxError::Runtime(format!(
        "{name} expects {expected}, got {}",
        got.type_name()
    ))
}

fn one(name: &str, mut args: Vec<Value>) -> Result<Value, SandboxError> {
    if args.len() != 1 {
        return Err(arity_error(name, "1", args.len()));
    }
    Ok(args.remove(0))
}

fn two(name: &str, mut args: Vec<Value>) -> Result<(Value, Value), SandboxError> {
    if args.len() != 2 {
        return Err(arity_error(name, "2", args.len()));
    }
    let second = args.remove(1);
    let first = args.remove(0);
    Ok((first, second))
}

fn len(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("len", args)? {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
        other => Err(type_error("len", "a string, list or map", &other)),
    }
}

fn to_str(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    let text = one("str", args)?.to_string();
    interp.charge(text.len())?;
    Ok(Value::Str(text))
}

fn to_int(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("int", args)? {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Float(f) => {
            if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Int(f.trunc() as i64))
            } else {
                Err(SandboxError::Runtime("float out of int range".to_string()))
            }
        }
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| SandboxError::Runtime(format!("invalid integer literal '{s}'"))),
        other => Err(type_error("int", "a number, bool or string", &other)),
    }
}

fn to_float(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("float", args)? {
        Value::Int(n) => Ok(Value::Float(n as f64)),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Bool(b) => Ok(Value::Float(b as i64 as f64)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| SandboxError::Runtime(format!("invalid float literal '{s}'"))),
        other => Err(type_error("float", "a number, bool or string", &other)),
    }
}

fn to_bool(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    Ok(Value::Bool(one("bool", args)?.truthy()))
}

fn abs(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("abs", args)? {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| SandboxError::Runtime("integer overflow in abs".to_string())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(type_error("abs", "a number", &other)),
    }
}

fn round(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("round", args)? {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Float(f) => {
            let rounded = f.round();
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(SandboxError::Runtime("float out of int range".to_string()))
            }
        }
        other => Err(type_error("round", "a number", &other)),
    }
}

/// Flatten `f([..])` and `f(a, b, c)` call shapes into one item list.
fn aggregate_items(name: &str, args: Vec<Value>) -> Result<Vec<Value>, SandboxError> {
    if args.is_empty() {
        return Err(arity_error(name, "at least 1", 0));
    }
    if args.len() == 1 {
        return match args.into_iter().next() {
            Some(Value::List(items)) => Ok(items),
            Some(single) => Ok(vec![single]),
            None => unreachable!(),
        };
    }
    Ok(args)
}

fn min(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    fold_extreme("min", args, std::cmp::Ordering::Less)
}

fn max(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    fold_extreme("max", args, std::cmp::Ordering::Greater)
}

fn fold_extreme(
    name: &str,
    args: Vec<Value>,
    keep: std::cmp::Ordering,
) -> Result<Value, SandboxError> {
    let items = aggregate_items(name, args)?;
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| SandboxError::Runtime(format!("{name} of an empty sequence")))?;
    for item in iter {
        if compare(&item, &best)? == keep {
            best = item;
        }
    }
    Ok(best)
}

fn sum(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    let items = aggregate_items("sum", args)?;
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;
    for item in items {
        match item {
            Value::Int(n) => {
                int_total = int_total
                    .checked_add(n)
                    .ok_or_else(|| SandboxError::Runtime("integer overflow in sum".to_string()))?;
            }
            Value::Float(f) => {
                saw_float = true;
                float_total += f;
            }
            other => return Err(type_error("sum", "numbers", &other)),
        }
    }
    if saw_float {
        Ok(Value::Float(float_total + int_total as f64))
    } else {
        Ok(Value::Int(int_total))
    }
}

fn sorted(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("sorted", args)? {
        Value::List(items) => {
            let mut out = items;
            interp.charge(out.iter().map(Value::cost).sum::<usize>())?;
            let mut failed = None;
            out.sort_by(|a, b| match compare(a, b) {
                Ok(ordering) => ordering,
                Err(e) => {
                    failed.get_or_insert(e);
                    std::cmp::Ordering::Equal
                }
            });
            match failed {
                Some(e) => Err(e),
                None => Ok(Value::List(out)),
            }
        }
        other => Err(type_error("sorted", "a list", &other)),
    }
}

fn range(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    let bounds: Vec<i64> = args
        .iter()
        .map(|v| match v {
            Value::Int(n) => Ok(*n),
            other => Err(type_error("range", "integers", other)),
        })
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(arity_error("range", "1 to 3", args.len())),
    };
    if step == 0 {
        return Err(SandboxError::Runtime("range step cannot be zero".to_string()));
    }
    let span = if step > 0 {
        stop.saturating_sub(start).max(0)
    } else {
        start.saturating_sub(stop).max(0)
    };
    let count = (span as u64).div_ceil(step.unsigned_abs()) as usize;
    interp.charge(count.saturating_mul(16))?;
    let mut items = Vec::with_capacity(count);
    let mut current = start;
    for _ in 0..count {
        items.push(Value::Int(current));
        current = current.wrapping_add(step);
    }
    Ok(Value::List(items))
}

fn enumerate(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("enumerate", args)? {
        Value::List(items) => {
            interp.charge(items.len().saturating_mul(48))?;
            Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::List(vec![Value::Int(i as i64), item]))
                    .collect(),
            ))
        }
        other => Err(type_error("enumerate", "a list", &other)),
    }
}

fn zip(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match two("zip", args)? {
        (Value::List(a), Value::List(b)) => {
            interp.charge(a.len().min(b.len()).saturating_mul(48))?;
            Ok(Value::List(
                a.into_iter()
                    .zip(b)
                    .map(|(x, y)| Value::List(vec![x, y]))
                    .collect(),
            ))
        }
        (Value::List(_), b) => Err(type_error("zip", "two lists", &b)),
        (a, _) => Err(type_error("zip", "two lists", &a)),
    }
}

fn map_fn(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    let (func, items) = two("map", args)?;
    let Value::List(items) = items else {
        return Err(type_error("map", "a function and a list", &items));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let mapped = interp.call_value(&func, vec![item])?;
        interp.charge(mapped.cost())?;
        out.push(mapped);
    }
    Ok(Value::List(out))
}

fn filter_fn(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    let (func, items) = two("filter", args)?;
    let Value::List(items) = items else {
        return Err(type_error("filter", "a function and a list", &items));
    };
    let mut out = Vec::new();
    for item in items {
        if interp.call_value(&func, vec![item.clone()])?.truthy() {
            interp.charge(item.cost())?;
            out.push(item);
        }
    }
    Ok(Value::List(out))
}

fn keys(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("keys", args)? {
        Value::Map(entries) => {
            interp.charge(entries.keys().map(|k| 24 + k.len()).sum::<usize>())?;
            Ok(Value::List(
                entries.into_keys().map(Value::Str).collect(),
            ))
        }
        other => Err(type_error("keys", "a map", &other)),
    }
}

fn values(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("values", args)? {
        Value::Map(entries) => {
            let out: Vec<Value> = entries.into_values().collect();
            interp.charge(out.iter().map(Value::cost).sum::<usize>())?;
            Ok(Value::List(out))
        }
        other => Err(type_error("values", "a map", &other)),
    }
}

fn push(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match two("push", args)? {
        (Value::List(mut items), value) => {
            interp.charge(value.cost() + 16)?;
            items.push(value);
            Ok(Value::List(items))
        }
        (other, _) => Err(type_error("push", "a list", &other)),
    }
}

fn contains(_interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match two("contains", args)? {
        (Value::List(items), value) => Ok(Value::Bool(items.contains(&value))),
        (Value::Map(entries), Value::Str(key)) => Ok(Value::Bool(entries.contains_key(&key))),
        (Value::Str(haystack), Value::Str(needle)) => {
            Ok(Value::Bool(haystack.contains(&needle)))
        }
        (Value::Map(_), key) => Err(type_error("contains", "a string key", &key)),
        (Value::Str(_), needle) => Err(type_error("contains", "a string needle", &needle)),
        (a, _) => Err(type_error("contains", "a list, map or string", &a)),
    }
}

fn join(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match two("join", args)? {
        (Value::List(items), Value::Str(sep)) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(s) => parts.push(s),
                    other => return Err(type_error("join", "a list of strings", &other)),
                }
            }
            let total: usize = parts.iter().map(String::len).sum::<usize>()
                + sep.len().saturating_mul(parts.len().saturating_sub(1));
            interp.charge(total)?;
            Ok(Value::Str(parts.join(&sep)))
        }
        (Value::List(_), sep) => Err(type_error("join", "a separator string", &sep)),
        (a, _) => Err(type_error("join", "a list and a separator string", &a)),
    }
}

fn split(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match two("split", args)? {
        (Value::Str(s), Value::Str(sep)) => {
            if sep.is_empty() {
                return Err(SandboxError::Runtime("empty separator".to_string()));
            }
            interp.charge(s.len().saturating_mul(2))?;
            Ok(Value::List(
                s.split(&sep).map(|part| Value::Str(part.to_string())).collect(),
            ))
        }
        (Value::Str(_), sep) => Err(type_error("split", "a string separator", &sep)),
        (a, _) => Err(type_error("split", "two strings", &a)),
    }
}

fn upper(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("upper", args)? {
        Value::Str(s) => {
            interp.charge(s.len())?;
            Ok(Value::Str(s.to_uppercase()))
        }
        other => Err(type_error("upper", "a string", &other)),
    }
}

fn lower(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match one("lower", args)? {
        Value::Str(s) => {
            interp.charge(s.len())?;
            Ok(Value::Str(s.to_lowercase()))
        }
        other => Err(type_error("lower", "a string", &other)),
    }
}

fn repeat(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    match two("repeat", args)? {
        (Value::Str(s), Value::Int(n)) => {
            if n < 0 {
                return Err(SandboxError::Runtime(
                    "repeat count cannot be negative".to_string(),
                ));
            }
            // Charge before materializing: an over-ceiling repetition must
            // surface as a result, not an allocation failure.
            let total = s.len().saturating_mul(n as usize);
            interp.charge(total)?;
            Ok(Value::Str(s.repeat(n as usize)))
        }
        (Value::Str(_), n) => Err(type_error("repeat", "an integer count", &n)),
        (a, _) => Err(type_error("repeat", "a string and an integer", &a)),
    }
}

fn print(interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, SandboxError> {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    interp.charge(line.len() + 1)?;
    interp.capture_print(line);
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::eval::{EvalBudget, Interpreter};

    fn interp() -> Interpreter {
        Interpreter::new(EvalBudget::standard())
    }

    #[test]
    fn table_has_no_duplicate_names() {
        let names: std::collections::HashSet<_> = BUILTINS.iter().map(|b| b.name).collect();
        assert_eq!(names.len(), BUILTINS.len());
    }

    #[test]
    fn table_has_no_escape_hatches() {
        for name in ["open", "read", "write", "import", "exec", "spawn", "system"] {
            assert!(lookup(name).is_none(), "{name} must not be allow-listed");
        }
    }

    #[test]
    fn len_counts_chars_items_and_entries() {
        let mut i = interp();
        assert_eq!(len(&mut i, vec![Value::Str("héllo".into())]).unwrap(), Value::Int(5));
        assert_eq!(
            len(&mut i, vec![Value::List(vec![Value::Int(1)])]).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn min_is_the_minimum() {
        let mut i = interp();
        let items = Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(min(&mut i, vec![items.clone()]).unwrap(), Value::Int(1));
        assert_eq!(max(&mut i, vec![items]).unwrap(), Value::Int(3));
    }

    #[test]
    fn sum_promotes_to_float_when_needed() {
        let mut i = interp();
        let ints = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(sum(&mut i, vec![ints]).unwrap(), Value::Int(3));
        let mixed = Value::List(vec![Value::Int(1), Value::Float(0.5)]);
        assert_eq!(sum(&mut i, vec![mixed]).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn sorted_rejects_mixed_types() {
        let mut i = interp();
        let mixed = Value::List(vec![Value::Int(1), Value::Str("a".into())]);
        assert!(sorted(&mut i, vec![mixed]).is_err());
    }

    #[test]
    fn type_errors_name_the_offending_argument() {
        let mut i = interp();
        let err =
            contains(&mut i, vec![Value::Map(Default::default()), Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("got int"));
        let err = zip(&mut i, vec![Value::List(vec![]), Value::Int(3)]).unwrap_err();
        assert!(err.to_string().contains("got int"));
        let err = repeat(&mut i, vec![Value::Str("x".into()), Value::Float(1.5)]).unwrap_err();
        assert!(err.to_string().contains("got float"));
    }

    #[test]
    fn range_shapes() {
        let mut i = interp();
        let Value::List(items) = range(&mut i, vec![Value::Int(3)]).unwrap() else {
            panic!("expected list")
        };
        assert_eq!(items, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);

        let Value::List(items) =
            range(&mut i, vec![Value::Int(5), Value::Int(1), Value::Int(-2)]).unwrap()
        else {
            panic!("expected list")
        };
        assert_eq!(items, vec![Value::Int(5), Value::Int(3)]);
    }

    #[test]
    fn repeat_charges_before_allocating() {
        let mut i = interp();
        let result = repeat(
            &mut i,
            vec![Value::Str("x".into()), Value::Int(1024 * 1024 * 1024)],
        );
        assert!(matches!(result, Err(SandboxError::Memory)));
    }

    #[test]
    fn print_is_captured_not_emitted() {
        let mut i = interp();
        print(&mut i, vec![Value::Str("a".into()), Value::Int(1)]).unwrap();
        assert_eq!(i.printed(), "a 1\n");
    }
}
