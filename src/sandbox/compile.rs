//! The restricted compiler: parse plus a name-resolution pass.
//!
//! The contract of this module is the security contract of the whole
//! environment: source that this pass did not explicitly accept is never
//! executed. Every free identifier must be either a binding introduced by
//! the program itself or a name in the allow-listed capability table;
//! anything else (`open`, `socket`, `spawn`, ...) is a compile-time
//! capability violation.

use std::collections::HashSet;

use super::ast::{Expr, Stmt};
use super::builtins;
use super::parser;
use crate::error::SandboxError;

/// A validated program, ready for the evaluator.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub program: Vec<Stmt>,
}

pub fn compile_restricted(source: &str) -> Result<CompiledUnit, SandboxError> {
    let program = parser::parse(source)?;
    let mut resolver = Resolver::new();
    resolver.resolve_program(&program)?;
    Ok(CompiledUnit { program })
}

struct Resolver {
    scopes: Vec<HashSet<String>>,
    loop_depth: usize,
    fn_depth: usize,
}

impl Resolver {
    fn new() -> Self {
        Self {
            scopes: vec![HashSet::new()],
            loop_depth: 0,
            fn_depth: 0,
        }
    }

    fn resolve_program(&mut self, program: &[Stmt]) -> Result<(), SandboxError> {
        // Top-level bindings are hoisted so functions may reference globals
        // defined later in the text. Use before the binding executes is still
        // caught at runtime.
        for stmt in program {
            match stmt {
                Stmt::Let { name, .. } | Stmt::Fn { name, .. } => {
                    self.define(name);
                }
                _ => {}
            }
        }
        for stmt in program {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) -> Result<(), SandboxError> {
        match stmt {
            Stmt::Let { name, value } => {
                self.resolve_expr(value)?;
                self.define(name);
                Ok(())
            }
            Stmt::Assign { name, value } => {
                self.resolve_expr(value)?;
                if self.is_declared(name) {
                    Ok(())
                } else if builtins::lookup(name).is_some() {
                    Err(SandboxError::Compile(format!(
                        "cannot assign to builtin '{name}'"
                    )))
                } else {
                    Err(SandboxError::Compile(format!(
                        "assignment to undefined name '{name}'"
                    )))
                }
            }
            Stmt::Fn { name, params, body } => {
                self.define(name);
                let mut seen = HashSet::new();
                for param in params {
                    if !seen.insert(param.clone()) {
                        return Err(SandboxError::Compile(format!(
                            "duplicate parameter '{param}' in fn '{name}'"
                        )));
                    }
                }
                // Function bodies see only globals and their own locals,
                // mirroring the evaluator's call frames.
                let shelved = self.scopes.split_off(1);
                self.scopes.push(seen);
                self.fn_depth += 1;
                let outer_loops = std::mem::take(&mut self.loop_depth);
                let result = self.resolve_block(body);
                self.loop_depth = outer_loops;
                self.fn_depth -= 1;
                self.scopes.truncate(1);
                self.scopes.extend(shelved);
                result
            }
            Stmt::Return(value) => {
                if self.fn_depth == 0 {
                    return Err(SandboxError::Compile(
                        "'return' outside of a function".to_string(),
                    ));
                }
                if let Some(value) = value {
                    self.resolve_expr(value)?;
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.resolve_expr(cond)?;
                self.scoped(|r| r.resolve_block(then_body))?;
                if let Some(else_body) = else_body {
                    self.scoped(|r| r.resolve_block(else_body))?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.resolve_expr(cond)?;
                self.loop_depth += 1;
                let result = self.scoped(|r| r.resolve_block(body));
                self.loop_depth -= 1;
                result
            }
            Stmt::For { var, iter, body } => {
                self.resolve_expr(iter)?;
                self.loop_depth += 1;
                let result = self.scoped(|r| {
                    r.define(var);
                    r.resolve_block(body)
                });
                self.loop_depth -= 1;
                result
            }
            Stmt::Break | Stmt::Continue => {
                if self.loop_depth == 0 {
                    return Err(SandboxError::Compile(
                        "'break'/'continue' outside of a loop".to_string(),
                    ));
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.resolve_expr(expr),
        }
    }

    fn resolve_block(&mut self, body: &[Stmt]) -> Result<(), SandboxError> {
        // Functions declared anywhere in the block are visible throughout it.
        for stmt in body {
            if let Stmt::Fn { name, .. } = stmt {
                self.define(name);
            }
        }
        for stmt in body {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }

    fn resolve_expr(&mut self, expr: &Expr) -> Result<(), SandboxError> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Ident(name) => {
                if self.is_declared(name) || builtins::lookup(name).is_some() {
                    Ok(())
                } else {
                    Err(SandboxError::Compile(format!(
                        "unknown name '{name}'; only allow-listed operations are available"
                    )))
                }
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs)?;
                self.resolve_expr(rhs)
            }
            Expr::Call { callee, args } => {
                self.resolve_expr(callee)?;
                for arg in args {
                    self.resolve_expr(arg)?;
                }
                Ok(())
            }
            Expr::Index { target, index } => {
                self.resolve_expr(target)?;
                self.resolve_expr(index)
            }
            Expr::List(items) => {
                for item in items {
                    self.resolve_expr(item)?;
                }
                Ok(())
            }
            Expr::Map(entries) => {
                for (_, value) in entries {
                    self.resolve_expr(value)?;
                }
                Ok(())
            }
        }
    }

    fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SandboxError>,
    ) -> Result<T, SandboxError> {
        self.scopes.push(HashSet::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }
}
