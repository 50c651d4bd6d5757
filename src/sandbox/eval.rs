//! Tree-walking evaluator with in-band resource accounting.
//!
//! The evaluator enforces three ceilings of its own, all surfaced as result
//! values rather than process faults:
//! - wall clock: the deadline is polled every few thousand evaluation steps;
//! - allocation: a byte budget charged before construction of strings, lists
//!   and maps, reconciled against the live footprint of the environment when
//!   the running total crosses the ceiling;
//! - call depth: a fixed recursion cap.
//!
//! The OS rlimits applied at startup remain the hard backstop underneath.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::ast::{BinaryOp, Expr, Literal, Stmt, UnaryOp};
use super::builtins;
use super::compile::CompiledUnit;
use super::env::Environment;
use super::value::{compare, FunctionValue, Value};
use crate::error::SandboxError;
use crate::limits;

/// Evaluation steps between wall-clock deadline polls.
const DEADLINE_POLL_INTERVAL: u64 = 4096;

/// Maximum user-function call depth.
pub const MAX_CALL_DEPTH: usize = 64;

/// Per-execution evaluation budget.
#[derive(Debug, Clone, Copy)]
pub struct EvalBudget {
    pub deadline: Instant,
    pub heap_bytes: usize,
    pub max_depth: usize,
}

impl EvalBudget {
    /// The fixed production budget: wall-clock and allocation ceilings match
    /// the process-wide limits.
    pub fn standard() -> Self {
        Self::with_wall_budget(limits::MAX_WALL_CLOCK)
    }

    /// Same allocation and depth ceilings with a custom wall budget.
    pub fn with_wall_budget(wall: Duration) -> Self {
        Self {
            deadline: Instant::now() + wall,
            heap_bytes: limits::MAX_MEMORY_BYTES as usize,
            max_depth: MAX_CALL_DEPTH,
        }
    }
}

/// Statement-level control flow.
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter {
    env: Environment,
    deadline: Instant,
    heap_budget: usize,
    /// Running total of charged allocations, including ones already dropped.
    charged: usize,
    max_depth: usize,
    depth: usize,
    steps: u64,
    printed: String,
}

impl Interpreter {
    pub fn new(budget: EvalBudget) -> Self {
        Self {
            env: Environment::new(),
            deadline: budget.deadline,
            heap_budget: budget.heap_bytes,
            charged: 0,
            max_depth: budget.max_depth,
            depth: 0,
            steps: 0,
            printed: String::new(),
        }
    }

    /// Run a compiled unit against the fresh environment. On success the
    /// global scope holds the program's namespace.
    pub fn exec_program(&mut self, unit: &CompiledUnit) -> Result<(), SandboxError> {
        for stmt in &unit.program {
            // Top-level return/break are rejected at compile time, so every
            // statement here flows normally.
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    /// Output captured from `print` calls.
    pub fn printed(&self) -> &str {
        &self.printed
    }

    /// Read a binding from the program's global namespace.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.env.global(name)
    }

    pub(crate) fn capture_print(&mut self, line: String) {
        self.printed.push_str(&line);
        self.printed.push('\n');
    }

    /// Charge an allocation against the heap budget before materializing it.
    ///
    /// The running total counts every charge, including values that have
    /// since been dropped. Only when it crosses the ceiling is it settled
    /// against the live footprint, so code that churns through short-lived
    /// values is bounded by its peak live memory, not its lifetime total.
    pub(crate) fn charge(&mut self, bytes: usize) -> Result<(), SandboxError> {
        self.charged = self.charged.saturating_add(bytes);
        if self.charged > self.heap_budget {
            let live = self.env.footprint() + self.printed.len();
            if live.saturating_add(bytes) > self.heap_budget {
                return Err(SandboxError::Memory);
            }
            self.charged = live.saturating_add(bytes);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps % DEADLINE_POLL_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(SandboxError::Timeout);
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval_expr(value)?;
                self.env.define(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Assign { name, value } => {
                let value = self.eval_expr(value)?;
                if self.env.assign(name, value) {
                    Ok(Flow::Normal)
                } else {
                    Err(SandboxError::Runtime(format!(
                        "name '{name}' is not defined"
                    )))
                }
            }
            Stmt::Fn { name, params, body } => {
                self.charge(64)?;
                self.env.define(
                    name,
                    Value::Function(FunctionValue {
                        name: name.clone(),
                        params: params.clone(),
                        body: Rc::new(body.clone()),
                    }),
                );
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval_expr(cond)?.truthy() {
                    self.exec_block(then_body)
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                loop {
                    self.tick()?;
                    if !self.eval_expr(cond)?.truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, iter, body } => {
                let items = self.iterable_items(iter)?;
                for item in items {
                    self.tick()?;
                    self.env.push_scope();
                    self.env.define(var, item);
                    let flow = self.exec_stmts_in_current_scope(body);
                    self.env.pop_scope();
                    match flow? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn iterable_items(&mut self, iter: &Expr) -> Result<Vec<Value>, SandboxError> {
        match self.eval_expr(iter)? {
            Value::List(items) => Ok(items),
            Value::Str(s) => {
                self.charge(s.len().saturating_mul(2))?;
                Ok(s.chars().map(|c| Value::Str(c.to_string())).collect())
            }
            Value::Map(entries) => Ok(entries.into_keys().map(Value::Str).collect()),
            other => Err(SandboxError::Runtime(format!(
                "cannot iterate over {}",
                other.type_name()
            ))),
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, SandboxError> {
        self.env.push_scope();
        let flow = self.exec_stmts_in_current_scope(body);
        self.env.pop_scope();
        flow
    }

    fn exec_stmts_in_current_scope(&mut self, body: &[Stmt]) -> Result<Flow, SandboxError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, SandboxError> {
        self.tick()?;
        match expr {
            Expr::Literal(literal) => self.eval_literal(literal),
            Expr::Ident(name) => {
                if let Some(value) = self.env.get(name) {
                    Ok(value)
                } else if let Some(builtin) = builtins::lookup(name) {
                    Ok(Value::Builtin(builtin.name))
                } else {
                    Err(SandboxError::Runtime(format!(
                        "name '{name}' is not defined"
                    )))
                }
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| {
                            SandboxError::Runtime("integer overflow in negation".to_string())
                        }),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(SandboxError::Runtime(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::Call { callee, args } => {
                let callee = self.eval_expr(callee)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg)?);
                }
                self.call_value(&callee, evaluated)
            }
            Expr::Index { target, index } => {
                let target = self.eval_expr(target)?;
                let index = self.eval_expr(index)?;
                self.eval_index(target, index)
            }
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.eval_expr(item)?;
                    self.charge(value.cost())?;
                    out.push(value);
                }
                Ok(Value::List(out))
            }
            Expr::Map(entries) => {
                let mut out = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval_expr(value)?;
                    self.charge(24 + key.len() + value.cost())?;
                    out.insert(key.clone(), value);
                }
                Ok(Value::Map(out))
            }
        }
    }

    fn eval_literal(&mut self, literal: &Literal) -> Result<Value, SandboxError> {
        Ok(match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => {
                self.charge(s.len())?;
                Value::Str(s.clone())
            }
        })
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, SandboxError> {
        // Short-circuit forms first.
        match op {
            BinaryOp::And => {
                let lhs = self.eval_expr(lhs)?;
                if !lhs.truthy() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval_expr(rhs)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            BinaryOp::Or => {
                let lhs = self.eval_expr(lhs)?;
                if lhs.truthy() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval_expr(rhs)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            _ => {}
        }

        let lhs = self.eval_expr(lhs)?;
        let rhs = self.eval_expr(rhs)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinaryOp::NotEq => Ok(Value::Bool(lhs != rhs)),
            BinaryOp::Lt => Ok(Value::Bool(compare(&lhs, &rhs)? == std::cmp::Ordering::Less)),
            BinaryOp::LtEq => Ok(Value::Bool(
                compare(&lhs, &rhs)? != std::cmp::Ordering::Greater,
            )),
            BinaryOp::Gt => Ok(Value::Bool(
                compare(&lhs, &rhs)? == std::cmp::Ordering::Greater,
            )),
            BinaryOp::GtEq => Ok(Value::Bool(compare(&lhs, &rhs)? != std::cmp::Ordering::Less)),
            BinaryOp::Add => self.eval_add(lhs, rhs),
            BinaryOp::Sub => numeric_op("subtract", lhs, rhs, i64::checked_sub, |a, b| a - b),
            BinaryOp::Mul => numeric_op("multiply", lhs, rhs, i64::checked_mul, |a, b| a * b),
            BinaryOp::Div => match (&lhs, &rhs) {
                (_, Value::Int(0)) => {
                    Err(SandboxError::Runtime("division by zero".to_string()))
                }
                _ => numeric_op("divide", lhs, rhs, i64::checked_div, |a, b| a / b),
            },
            BinaryOp::Rem => match (&lhs, &rhs) {
                (_, Value::Int(0)) => {
                    Err(SandboxError::Runtime("division by zero".to_string()))
                }
                _ => numeric_op("take remainder of", lhs, rhs, i64::checked_rem, |a, b| {
                    a % b
                }),
            },
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn eval_add(&mut self, lhs: Value, rhs: Value) -> Result<Value, SandboxError> {
        match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                self.charge(a.len() + b.len())?;
                Ok(Value::Str(a + &b))
            }
            (Value::List(mut a), Value::List(b)) => {
                self.charge(b.iter().map(Value::cost).sum::<usize>() + 16)?;
                a.extend(b);
                Ok(Value::List(a))
            }
            (lhs, rhs) => numeric_op("add", lhs, rhs, i64::checked_add, |a, b| a + b),
        }
    }

    fn eval_index(&mut self, target: Value, index: Value) -> Result<Value, SandboxError> {
        match (target, index) {
            (Value::List(items), Value::Int(i)) => {
                let len = items.len() as i64;
                let resolved = if i < 0 { len + i } else { i };
                if resolved < 0 || resolved >= len {
                    return Err(SandboxError::Runtime(format!(
                        "list index {i} out of range (len {len})"
                    )));
                }
                Ok(items[resolved as usize].clone())
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let resolved = if i < 0 { len + i } else { i };
                if resolved < 0 || resolved >= len {
                    return Err(SandboxError::Runtime(format!(
                        "string index {i} out of range (len {len})"
                    )));
                }
                Ok(Value::Str(chars[resolved as usize].to_string()))
            }
            (Value::Map(entries), Value::Str(key)) => entries
                .get(&key)
                .cloned()
                .ok_or_else(|| SandboxError::Runtime(format!("key '{key}' not found"))),
            (target, index) => Err(SandboxError::Runtime(format!(
                "cannot index {} with {}",
                target.type_name(),
                index.type_name()
            ))),
        }
    }

    /// Invoke a function or builtin value with positional arguments.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value, SandboxError> {
        match callee {
            Value::Function(func) => {
                if args.len() != func.params.len() {
                    return Err(SandboxError::Runtime(format!(
                        "fn '{}' expects {} argument(s), got {}",
                        func.name,
                        func.params.len(),
                        args.len()
                    )));
                }
                if self.depth >= self.max_depth {
                    return Err(SandboxError::Runtime(
                        "recursion limit exceeded".to_string(),
                    ));
                }
                let locals: HashMap<String, Value> =
                    func.params.iter().cloned().zip(args).collect();
                let shelved = self.env.begin_call(locals);
                self.depth += 1;
                let result = self.exec_call_body(&func.body);
                self.depth -= 1;
                self.env.end_call(shelved);
                result
            }
            Value::Builtin(name) => {
                let builtin = builtins::lookup(name).ok_or_else(|| {
                    SandboxError::Runtime(format!("name '{name}' is not defined"))
                })?;
                (builtin.func)(self, args)
            }
            other => Err(SandboxError::Runtime(format!(
                "value of type {} is not callable",
                other.type_name()
            ))),
        }
    }

    fn exec_call_body(&mut self, body: &[Stmt]) -> Result<Value, SandboxError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                Flow::Return(value) => return Ok(value),
                Flow::Break | Flow::Continue => {
                    return Err(SandboxError::Runtime(
                        "loop control outside of a loop".to_string(),
                    ))
                }
            }
        }
        Ok(Value::Null)
    }
}

fn numeric_op(
    verb: &str,
    lhs: Value,
    rhs: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, SandboxError> {
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b).map(Value::Int).ok_or_else(|| {
            SandboxError::Runtime(format!("integer overflow while trying to {verb}"))
        }),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(SandboxError::Runtime(format!(
            "cannot {verb} {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::compile::compile_restricted;

    fn run(source: &str) -> Interpreter {
        let unit = compile_restricted(source).expect("compile");
        let mut interp = Interpreter::new(EvalBudget::standard());
        interp.exec_program(&unit).expect("execute");
        interp
    }

    fn run_err(source: &str) -> SandboxError {
        let unit = compile_restricted(source).expect("compile");
        let mut interp = Interpreter::new(EvalBudget::standard());
        interp.exec_program(&unit).expect_err("expected fault")
    }

    #[test]
    fn arithmetic_and_bindings() {
        let interp = run("let x = 1 + 2 * 3; let y = x % 4;");
        assert_eq!(interp.global("x"), Some(&Value::Int(7)));
        assert_eq!(interp.global("y"), Some(&Value::Int(3)));
    }

    #[test]
    fn string_concatenation() {
        let interp = run(r#"let s = "Hello, " + "safe world!";"#);
        assert_eq!(
            interp.global("s"),
            Some(&Value::Str("Hello, safe world!".into()))
        );
    }

    #[test]
    fn functions_and_recursion() {
        let interp = run(
            r#"
            fn fact(n) {
                if n <= 1 {
                    return 1;
                }
                return n * fact(n - 1);
            }
            let x = fact(10);
            "#,
        );
        assert_eq!(interp.global("x"), Some(&Value::Int(3628800)));
    }

    #[test]
    fn while_loop_with_break() {
        let interp = run(
            r#"
            let i = 0;
            while true {
                i = i + 1;
                if i >= 5 {
                    break;
                }
            }
            "#,
        );
        assert_eq!(interp.global("i"), Some(&Value::Int(5)));
    }

    #[test]
    fn for_loop_over_list_and_string() {
        let interp = run(
            r#"
            let total = 0;
            for n in [1, 2, 3] {
                total = total + n;
            }
            let letters = 0;
            for c in "abc" {
                letters = letters + 1;
            }
            "#,
        );
        assert_eq!(interp.global("total"), Some(&Value::Int(6)));
        assert_eq!(interp.global("letters"), Some(&Value::Int(3)));
    }

    #[test]
    fn builtin_pipeline() {
        let interp = run(
            r#"
            fn double(n) {
                return n * 2;
            }
            let xs = map(double, range(4));
            let total = sum(xs);
            "#,
        );
        assert_eq!(interp.global("total"), Some(&Value::Int(12)));
    }

    #[test]
    fn indexing_including_negative() {
        let interp = run(
            r#"
            let xs = [10, 20, 30];
            let first = xs[0];
            let last = xs[-1];
            let m = {"a": 1};
            let a = m["a"];
            "#,
        );
        assert_eq!(interp.global("first"), Some(&Value::Int(10)));
        assert_eq!(interp.global("last"), Some(&Value::Int(30)));
        assert_eq!(interp.global("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_fault() {
        let err = run_err("let x = 1 / 0;");
        assert!(matches!(err, SandboxError::Runtime(_)));
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn index_out_of_range_is_a_runtime_fault() {
        assert!(matches!(
            run_err("let x = [1][5];"),
            SandboxError::Runtime(_)
        ));
    }

    #[test]
    fn integer_overflow_is_a_runtime_fault() {
        let err = run_err("let x = 9223372036854775807 + 1;");
        assert!(matches!(err, SandboxError::Runtime(_)));
    }

    #[test]
    fn unbounded_loop_hits_the_deadline() {
        let unit = compile_restricted("while true { }").expect("compile");
        let mut interp =
            Interpreter::new(EvalBudget::with_wall_budget(Duration::from_millis(50)));
        let err = interp.exec_program(&unit).expect_err("expected timeout");
        assert!(matches!(err, SandboxError::Timeout));
    }

    #[test]
    fn oversized_allocation_hits_the_heap_budget() {
        let err = run_err(r#"let s = repeat("x", 400000000);"#);
        assert!(matches!(err, SandboxError::Memory));
    }

    #[test]
    fn unbounded_growth_hits_the_heap_budget() {
        let err = run_err(
            r#"
            let s = "0123456789012345678901234567890123456789";
            while true {
                s = s + s;
            }
            "#,
        );
        assert!(matches!(err, SandboxError::Memory));
    }

    #[test]
    fn discarded_allocations_are_reclaimed_by_the_budget() {
        // Lifetime allocations far beyond the ceiling, live memory in the
        // tens of kilobytes throughout.
        let interp = run(
            r#"
            let i = 0;
            while i < 40000 {
                let chunk = repeat("x", 10000);
                i = i + 1;
            }
            "#,
        );
        assert_eq!(interp.global("i"), Some(&Value::Int(40000)));
    }

    #[test]
    fn runaway_recursion_is_capped() {
        let err = run_err(
            r#"
            fn loop_forever(n) {
                return loop_forever(n + 1);
            }
            let x = loop_forever(0);
            "#,
        );
        assert!(matches!(err, SandboxError::Runtime(_)));
        assert!(err.to_string().contains("recursion"));
    }

    #[test]
    fn call_frames_do_not_leak_locals() {
        let interp = run(
            r#"
            fn f(a) {
                let inner = a * 2;
                return inner;
            }
            let x = f(3);
            "#,
        );
        assert_eq!(interp.global("x"), Some(&Value::Int(6)));
        assert_eq!(interp.global("inner"), None);
        assert_eq!(interp.global("a"), None);
    }

    #[test]
    fn print_accumulates_into_captured_buffer() {
        let interp = run(r#"print("a", 1); print("b");"#);
        assert_eq!(interp.printed(), "a 1\nb\n");
    }

    #[test]
    fn shadowing_a_builtin_with_let_is_allowed() {
        let interp = run("let len = 5; let x = len + 1;");
        assert_eq!(interp.global("x"), Some(&Value::Int(6)));
    }
}
