//! Tree-walking evaluator.
//!
//! Evaluation is synchronous. Promises are always settled by the time a
//! snippet sees them, so `await` simply unwraps the settled value or rethrows
//! the rejection. Control leaves a statement either normally, through a
//! [`Completion`] (return/break/continue), or through an [`Unwind`] (a thrown
//! value or an interrupt request from the host).

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::mem;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDecl, LogicalOp, Program,
    PropertyKey, Stmt, TemplatePart, UnaryOp,
};
use super::builtins;
use super::host::{ConsoleSink, FetchError, FetchRequest, FetchResponse, Fetcher, LogLevel};
use super::parser::ParseError;
use super::value::{Function, FunctionKind, ObjectKind, PromiseState, Value, release};

/// Nested call limit before a `RangeError` is raised.
pub const MAX_CALL_DEPTH: usize = 200;

/// Largest gap an array index assignment may open past the current length.
const MAX_ARRAY_GROWTH: usize = 1_000_000;

/// Abrupt exit from evaluation.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// A JavaScript `throw` (or an internally raised error object).
    Throw(Value),
    /// The host asked the snippet to stop, or the console went away.
    Interrupted,
}

impl Unwind {
    pub fn error(name: &str, message: impl AsRef<str>) -> Self {
        Self::Throw(Value::error(name, message.as_ref()))
    }

    pub fn type_error(message: impl AsRef<str>) -> Self {
        Self::error("TypeError", message)
    }

    pub fn reference_error(message: impl AsRef<str>) -> Self {
        Self::error("ReferenceError", message)
    }

    pub fn range_error(message: impl AsRef<str>) -> Self {
        Self::error("RangeError", message)
    }
}

/// Failure of a whole snippet run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("SyntaxError: {0}")]
    Syntax(#[from] ParseError),
    #[error("Uncaught {thrown}")]
    Uncaught {
        name: String,
        /// What `error.message` reads; `undefined` for thrown primitives.
        message: String,
        /// `String(value)` of the thrown value.
        thrown: String,
    },
    #[error("execution interrupted")]
    Interrupted,
}

impl ScriptError {
    /// The text a `catch (error)` handler would see as `error.message`.
    pub fn message(&self) -> String {
        match self {
            Self::Syntax(err) => err.to_string(),
            Self::Uncaught { message, .. } => message.clone(),
            Self::Interrupted => "Execution interrupted".to_string(),
        }
    }

    pub fn from_thrown(value: &Value) -> Self {
        let thrown = value.to_js_string();
        match value {
            Value::Object(obj) => {
                let obj = obj.borrow();
                let name = obj
                    .get("name")
                    .map_or_else(|| "Error".to_string(), |v| v.to_js_string());
                let message = obj
                    .get("message")
                    .map_or_else(|| "undefined".to_string(), |v| v.to_js_string());
                Self::Uncaught {
                    name,
                    message,
                    thrown,
                }
            }
            _ => Self::Uncaught {
                name: value.type_of().to_string(),
                message: "undefined".to_string(),
                thrown,
            },
        }
    }
}

impl From<Unwind> for ScriptError {
    fn from(unwind: Unwind) -> Self {
        match unwind {
            Unwind::Throw(value) => Self::from_thrown(&value),
            Unwind::Interrupted => Self::Interrupted,
        }
    }
}

/// How a statement finished when it did not unwind.
#[derive(Debug)]
enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
    initialized: bool,
}

#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, Binding>,
    parent: Option<Scope>,
}

impl Frame {
    fn take_contents(&mut self) -> (Vec<Value>, Option<Scope>) {
        let values = mem::take(&mut self.vars)
            .into_values()
            .map(|binding| binding.value)
            .collect();
        (values, self.parent.take())
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let (values, parent) = self.take_contents();
        if !values.is_empty() || parent.is_some() {
            release(values, parent.into_iter().collect());
        }
    }
}

/// Weak handles to every frame created under one global scope.
#[derive(Debug, Default)]
struct FrameRegistry {
    frames: RefCell<Vec<Weak<RefCell<Frame>>>>,
}

impl FrameRegistry {
    fn track(&self, frame: &Rc<RefCell<Frame>>) {
        let mut frames = self.frames.borrow_mut();
        if frames.len() == frames.capacity() && frames.len() >= 64 {
            frames.retain(|frame| frame.strong_count() > 0);
            // Grow anyway when most frames are still alive so pruning stays amortized.
            let live = frames.len();
            if live * 2 > frames.capacity() {
                frames.reserve(live);
            }
        }
        frames.push(Rc::downgrade(frame));
    }

    /// Empty every frame that is still alive.
    fn clear_all(&self) {
        let frames: Vec<Rc<RefCell<Frame>>> = self
            .frames
            .borrow_mut()
            .drain(..)
            .filter_map(|frame| frame.upgrade())
            .collect();
        let mut values = Vec::new();
        let mut parents = Vec::new();
        for frame in &frames {
            if let Ok(mut frame) = frame.try_borrow_mut() {
                let (bindings, parent) = frame.take_contents();
                values.extend(bindings);
                parents.extend(parent);
            }
        }
        release(values, parents);
    }
}

enum Lookup {
    Found(Value),
    Uninitialized,
    Missing,
}

enum AssignOutcome {
    Done,
    Constant,
    Uninitialized,
    Missing,
}

/// Lexical environment, shared by closures.
///
/// Every frame reachable from one [`Scope::new`] shares a registry so the
/// interpreter can empty them all when it is dropped.
#[derive(Debug, Clone)]
pub struct Scope(Rc<RefCell<Frame>>, Rc<FrameRegistry>);

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::with_frame(Frame::default(), Rc::default())
    }

    fn with_frame(frame: Frame, registry: Rc<FrameRegistry>) -> Self {
        let frame = Rc::new(RefCell::new(frame));
        registry.track(&frame);
        Self(frame, registry)
    }

    pub fn child(&self) -> Self {
        Self::with_frame(
            Frame {
                vars: HashMap::new(),
                parent: Some(self.clone()),
            },
            Rc::clone(&self.1),
        )
    }

    /// A sibling frame holding copies of this frame's bindings.
    fn copy_frame(&self) -> Self {
        let copy = {
            let frame = self.0.borrow();
            Frame {
                vars: frame.vars.clone(),
                parent: frame.parent.clone(),
            }
        };
        Self::with_frame(copy, Rc::clone(&self.1))
    }

    /// The bindings and parent of this frame if nothing else shares it.
    pub(crate) fn into_contents(self) -> Option<(Vec<Value>, Option<Self>)> {
        let frame = Rc::try_unwrap(self.0).ok()?;
        Some(frame.into_inner().take_contents())
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.0.borrow_mut().vars.insert(
            name.to_string(),
            Binding {
                value,
                mutable,
                initialized: true,
            },
        );
    }

    fn declare_uninitialized(&self, name: &str, mutable: bool) {
        self.0.borrow_mut().vars.insert(
            name.to_string(),
            Binding {
                value: Value::Undefined,
                mutable,
                initialized: false,
            },
        );
    }

    fn has_own(&self, name: &str) -> bool {
        self.0.borrow().vars.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        match self.lookup(name) {
            Lookup::Found(value) => Some(value),
            Lookup::Uninitialized | Lookup::Missing => None,
        }
    }

    fn lookup(&self, name: &str) -> Lookup {
        let mut current = self.clone();
        loop {
            let parent = {
                let frame = current.0.borrow();
                if let Some(binding) = frame.vars.get(name) {
                    return if binding.initialized {
                        Lookup::Found(binding.value.clone())
                    } else {
                        Lookup::Uninitialized
                    };
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return Lookup::Missing,
            }
        }
    }

    fn assign(&self, name: &str, value: Value) -> AssignOutcome {
        let mut current = self.clone();
        loop {
            let parent = {
                let mut frame = current.0.borrow_mut();
                if let Some(binding) = frame.vars.get_mut(name) {
                    if !binding.initialized {
                        return AssignOutcome::Uninitialized;
                    }
                    if !binding.mutable {
                        return AssignOutcome::Constant;
                    }
                    binding.value = value;
                    return AssignOutcome::Done;
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => return AssignOutcome::Missing,
            }
        }
    }

    /// Empty every frame created under the same global scope.
    fn release_frames(&self) {
        self.1.clear_all();
    }
}

enum Reference {
    Binding(String),
    Property(Value, String),
}

pub struct Interpreter {
    globals: Scope,
    console: Box<dyn ConsoleSink>,
    fetcher: Arc<dyn Fetcher>,
    interrupt: Arc<AtomicBool>,
    depth: usize,
}

impl Interpreter {
    pub fn new(console: Box<dyn ConsoleSink>, fetcher: Arc<dyn Fetcher>) -> Self {
        let globals = Scope::new();
        builtins::install(&globals);
        Self {
            globals,
            console,
            fetcher,
            interrupt: Arc::new(AtomicBool::new(false)),
            depth: 0,
        }
    }

    /// Share an interrupt flag with the host; raising it stops the snippet
    /// at the next statement or loop iteration.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn define_global(&self, name: &str, value: Value) {
        self.globals.declare(name, value, true);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    /// Run a program as the body of an async function and return the
    /// awaited result (`undefined` when nothing is returned).
    ///
    /// # Errors
    /// Returns the uncaught error, or [`ScriptError::Interrupted`].
    pub fn run_function_body(&mut self, program: &Program) -> Result<Value, ScriptError> {
        let scope = self.globals.child();
        scope.declare("this", Value::Undefined, false);
        let completion = self.run_body(&program.body, &scope)?;
        let value = match completion {
            Completion::Return(value) => value,
            _ => Value::Undefined,
        };
        Ok(Self::await_value(value)?)
    }

    /// Run a program as a classic script at global scope.
    ///
    /// # Errors
    /// Returns the uncaught error, or [`ScriptError::Interrupted`].
    pub fn run_script(&mut self, program: &Program) -> Result<(), ScriptError> {
        let globals = self.globals.clone();
        globals.declare("this", Value::Undefined, false);
        self.run_body(&program.body, &globals)?;
        Ok(())
    }

    /// Forward a console call to the host.
    pub fn emit(&mut self, level: LogLevel, text: String) -> Result<(), Unwind> {
        if self.console.emit(level, text) {
            Ok(())
        } else {
            Err(Unwind::Interrupted)
        }
    }

    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.fetcher.fetch(request)
    }

    fn check_interrupt(&self) -> Result<(), Unwind> {
        if self.interrupt.load(Ordering::Relaxed) {
            Err(Unwind::Interrupted)
        } else {
            Ok(())
        }
    }

    // --- Statements ---

    fn run_body(&mut self, body: &[Stmt], scope: &Scope) -> Result<Completion, Unwind> {
        let mut names = Vec::new();
        collect_var_names(body, &mut names);
        for name in names {
            if !scope.has_own(&name) {
                scope.declare(&name, Value::Undefined, true);
            }
        }
        self.exec_block(body, scope)
    }

    /// Declare block-level functions and `let`/`const` names before running.
    fn hoist_lexical(stmts: &[Stmt], scope: &Scope) {
        for stmt in stmts {
            match stmt {
                Stmt::Function(decl) => {
                    if let Some(name) = &decl.name {
                        let closure = Self::make_closure(decl, scope, None);
                        scope.declare(name, closure, true);
                    }
                }
                Stmt::VarDecl {
                    kind: kind @ (DeclKind::Let | DeclKind::Const),
                    declarations,
                    ..
                } => {
                    for (name, _) in declarations {
                        scope.declare_uninitialized(name, *kind == DeclKind::Let);
                    }
                }
                _ => {}
            }
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Scope) -> Result<Completion, Unwind> {
        Self::hoist_lexical(stmts, scope);
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> Result<Completion, Unwind> {
        self.check_interrupt()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::VarDecl {
                kind, declarations, ..
            } => {
                for (name, init) in declarations {
                    match (kind, init) {
                        (DeclKind::Var, None) => {}
                        (DeclKind::Var, Some(init)) => {
                            let value = self.eval_named(init, name, scope)?;
                            self.assign_binding(name, value, scope)?;
                        }
                        (_, init) => {
                            let value = match init {
                                Some(init) => self.eval_named(init, name, scope)?,
                                None => Value::Undefined,
                            };
                            scope.declare(name, value, *kind != DeclKind::Const);
                        }
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Completion::Normal),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.exec_stmt(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec_stmt(alternate, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::While { test, body } => {
                loop {
                    self.check_interrupt()?;
                    if !self.eval(test, scope)?.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    self.check_interrupt()?;
                    match self.exec_stmt(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, scope)?.is_truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, scope),
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            } => self.exec_for_of(*kind, name, iterable, body, scope),
            Stmt::Block(stmts) => self.exec_block(stmts, &scope.child()),
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Throw(expr) => Err(Unwind::Throw(self.eval(expr, scope)?)),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => self.exec_try(block, param.as_deref(), handler.as_deref(), finalizer.as_deref(), scope),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &Scope,
    ) -> Result<Completion, Unwind> {
        let mut loop_scope = scope.child();
        if let Some(init) = init {
            self.exec_stmt(init, &loop_scope)?;
        }
        loop {
            self.check_interrupt()?;
            if let Some(test) = test {
                if !self.eval(test, &loop_scope)?.is_truthy() {
                    break;
                }
            }
            match self.exec_stmt(body, &loop_scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            // Each iteration gets fresh `let` bindings so closures capture
            // the value of that iteration.
            loop_scope = loop_scope.copy_frame();
            if let Some(update) = update {
                self.eval(update, &loop_scope)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_of(
        &mut self,
        kind: DeclKind,
        name: &str,
        iterable: &Expr,
        body: &Stmt,
        scope: &Scope,
    ) -> Result<Completion, Unwind> {
        let source = self.eval(iterable, scope)?;
        let chars: Vec<Value> = match &source {
            Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
            _ => Vec::new(),
        };
        let items = match &source {
            Value::Array(items) => Some(items),
            Value::Str(_) => None,
            _ => {
                return Err(Unwind::type_error(format!(
                    "{} is not iterable",
                    iterable.describe()
                )));
            }
        };

        let mut index = 0;
        loop {
            self.check_interrupt()?;
            let item = match items {
                Some(items) => {
                    let items = items.borrow();
                    match items.get(index) {
                        Some(item) => item.clone(),
                        None => break,
                    }
                }
                None => match chars.get(index) {
                    Some(item) => item.clone(),
                    None => break,
                },
            };
            index += 1;

            let iteration_scope = scope.child();
            if kind == DeclKind::Var {
                self.assign_binding(name, item, scope)?;
            } else {
                iteration_scope.declare(name, item, kind == DeclKind::Let);
            }
            match self.exec_stmt(body, &iteration_scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&str>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        scope: &Scope,
    ) -> Result<Completion, Unwind> {
        let mut result = self.exec_block(block, &scope.child());
        if let Some(handler) = handler {
            if let Err(Unwind::Throw(thrown)) = result {
                let catch_scope = scope.child();
                if let Some(param) = param {
                    catch_scope.declare(param, thrown, true);
                }
                result = self.exec_block(handler, &catch_scope);
            }
        }
        if let Some(finalizer) = finalizer {
            match self.exec_block(finalizer, &scope.child())? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        result
    }

    // --- Expressions ---

    fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, Unwind> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::from(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            out.push_str(&self.eval(expr, scope)?.to_js_string());
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name, _) => Self::lookup(name, scope),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::array(values))
            }
            Expr::Object(props) => {
                let object = Value::object(Vec::new());
                for (key, value_expr) in props {
                    let key = match key {
                        PropertyKey::Named(name) => name.clone(),
                        PropertyKey::Computed(expr) => self.eval(expr, scope)?.to_property_key(),
                    };
                    let value = self.eval_named(value_expr, &key, scope)?;
                    Self::set_property(&object, &key, value)?;
                }
                Ok(object)
            }
            Expr::Function(decl) => {
                if decl.is_arrow || decl.name.is_none() {
                    return Ok(Self::make_closure(decl, scope, None));
                }
                // Named function expressions can refer to themselves.
                let own_scope = scope.child();
                let closure = Self::make_closure(decl, &own_scope, None);
                if let Some(name) = &decl.name {
                    own_scope.declare(name, closure.clone(), false);
                }
                Ok(closure)
            }
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, scope),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                Self::binary(*op, &lhs, &rhs)
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !lhs.is_truthy(),
                    LogicalOp::Or => lhs.is_truthy(),
                    LogicalOp::Nullish => !lhs.is_nullish(),
                };
                if short_circuit {
                    Ok(lhs)
                } else {
                    self.eval(rhs, scope)
                }
            }
            Expr::Assign {
                op, target, value, ..
            } => self.eval_assign(*op, target, value, scope),
            Expr::Update {
                increment,
                prefix,
                target,
                ..
            } => {
                let reference = self.resolve_reference(target, scope)?;
                let old = self.read_reference(&reference, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_reference(&reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Call { .. } | Expr::Member { .. } | Expr::Index { .. } => {
                Ok(self.eval_chain(expr, scope)?.unwrap_or_default())
            }
            Expr::New { callee, args, .. } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                self.construct(&constructor, args, callee)
            }
            Expr::Await(operand) => {
                let value = self.eval(operand, scope)?;
                self.check_interrupt()?;
                Self::await_value(value)
            }
        }
    }

    /// Evaluate, naming anonymous functions after the binding they land in.
    fn eval_named(&mut self, expr: &Expr, name: &str, scope: &Scope) -> Result<Value, Unwind> {
        match expr {
            Expr::Function(decl) if decl.name.is_none() => {
                Ok(Self::make_closure(decl, scope, Some(name)))
            }
            _ => self.eval(expr, scope),
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Scope) -> Result<Vec<Value>, Unwind> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        Ok(values)
    }

    /// Evaluate a member/call chain. `None` means an optional link (`?.`)
    /// met a nullish value and the rest of the chain was skipped.
    fn eval_chain(&mut self, expr: &Expr, scope: &Scope) -> Result<Option<Value>, Unwind> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
                ..
            } => {
                let Some(object) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                self.get_property(&object, property).map(Some)
            }
            Expr::Index { object, index, .. } => {
                let Some(object) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                let key = self.eval(index, scope)?.to_property_key();
                self.get_property(&object, &key).map(Some)
            }
            Expr::Call { callee, args, .. } => {
                let Some((function, this)) = self.eval_callee(callee, scope)? else {
                    return Ok(None);
                };
                let args = self.eval_args(args, scope)?;
                if !matches!(function, Value::Function(_)) {
                    return Err(Unwind::type_error(format!(
                        "{} is not a function",
                        callee.describe()
                    )));
                }
                self.call_function(&function, &this, args).map(Some)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    /// Resolve a callee to `(function, this)`.
    fn eval_callee(
        &mut self,
        callee: &Expr,
        scope: &Scope,
    ) -> Result<Option<(Value, Value)>, Unwind> {
        match callee {
            Expr::Member {
                object,
                property,
                optional,
                ..
            } => {
                let Some(object) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                let function = self.get_property(&object, property)?;
                Ok(Some((function, object)))
            }
            Expr::Index { object, index, .. } => {
                let Some(object) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                let key = self.eval(index, scope)?.to_property_key();
                let function = self.get_property(&object, &key)?;
                Ok(Some((function, object)))
            }
            other => Ok(self
                .eval_chain(other, scope)?
                .map(|function| (function, Value::Undefined))),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, scope: &Scope) -> Result<Value, Unwind> {
        if op == UnaryOp::Typeof {
            if let Expr::Ident(name, _) = operand {
                // typeof tolerates undeclared names.
                if matches!(scope.lookup(name), Lookup::Missing) {
                    return Ok(Value::from("undefined"));
                }
            }
        }
        let value = self.eval(operand, scope)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Typeof => Value::from(value.type_of()),
            UnaryOp::Void => Value::Undefined,
        })
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        scope: &Scope,
    ) -> Result<Value, Unwind> {
        let reference = self.resolve_reference(target, scope)?;
        let new_value = match op {
            AssignOp::Assign => match &reference {
                Reference::Binding(name) => self.eval_named(value, name, scope)?,
                Reference::Property(..) => self.eval(value, scope)?,
            },
            AssignOp::Compound(bin) => {
                let current = self.read_reference(&reference, scope)?;
                let rhs = self.eval(value, scope)?;
                Self::binary(bin, &current, &rhs)?
            }
            AssignOp::Logical(logical) => {
                let current = self.read_reference(&reference, scope)?;
                let short_circuit = match logical {
                    LogicalOp::And => !current.is_truthy(),
                    LogicalOp::Or => current.is_truthy(),
                    LogicalOp::Nullish => !current.is_nullish(),
                };
                if short_circuit {
                    return Ok(current);
                }
                self.eval(value, scope)?
            }
        };
        self.write_reference(&reference, new_value.clone(), scope)?;
        Ok(new_value)
    }

    fn resolve_reference(&mut self, target: &Expr, scope: &Scope) -> Result<Reference, Unwind> {
        match target {
            Expr::Ident(name, _) => Ok(Reference::Binding(name.clone())),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                Ok(Reference::Property(object, property.clone()))
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let key = self.eval(index, scope)?.to_property_key();
                Ok(Reference::Property(object, key))
            }
            _ => Err(Unwind::error(
                "SyntaxError",
                "Invalid left-hand side in assignment",
            )),
        }
    }

    fn read_reference(&mut self, reference: &Reference, scope: &Scope) -> Result<Value, Unwind> {
        match reference {
            Reference::Binding(name) => Self::lookup(name, scope),
            Reference::Property(object, key) => self.get_property(object, key),
        }
    }

    fn write_reference(
        &mut self,
        reference: &Reference,
        value: Value,
        scope: &Scope,
    ) -> Result<(), Unwind> {
        match reference {
            Reference::Binding(name) => self.assign_binding(name, value, scope),
            Reference::Property(object, key) => Self::set_property(object, key, value),
        }
    }

    fn lookup(name: &str, scope: &Scope) -> Result<Value, Unwind> {
        match scope.lookup(name) {
            Lookup::Found(value) => Ok(value),
            Lookup::Uninitialized => Err(Unwind::reference_error(format!(
                "Cannot access '{name}' before initialization"
            ))),
            Lookup::Missing => Err(Unwind::reference_error(format!("{name} is not defined"))),
        }
    }

    fn assign_binding(&mut self, name: &str, value: Value, scope: &Scope) -> Result<(), Unwind> {
        match scope.assign(name, value.clone()) {
            AssignOutcome::Done => Ok(()),
            AssignOutcome::Constant => Err(Unwind::type_error("Assignment to constant variable.")),
            AssignOutcome::Uninitialized => Err(Unwind::reference_error(format!(
                "Cannot access '{name}' before initialization"
            ))),
            AssignOutcome::Missing => {
                // Sloppy-mode implicit global.
                self.globals.declare(name, value, true);
                Ok(())
            }
        }
    }

    fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Unwind> {
        Ok(match op {
            BinaryOp::Add => {
                let (lhs, rhs) = (lhs.to_primitive(), rhs.to_primitive());
                if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                    Value::from(lhs.to_js_string() + &rhs.to_js_string())
                } else {
                    Value::Number(lhs.to_number() + rhs.to_number())
                }
            }
            BinaryOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
            BinaryOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
            BinaryOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
            BinaryOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
            BinaryOp::Pow => Value::Number(lhs.to_number().powf(rhs.to_number())),
            BinaryOp::Eq => Value::Bool(lhs.loose_equals(rhs)),
            BinaryOp::NotEq => Value::Bool(!lhs.loose_equals(rhs)),
            BinaryOp::StrictEq => Value::Bool(lhs.strict_equals(rhs)),
            BinaryOp::StrictNotEq => Value::Bool(!lhs.strict_equals(rhs)),
            BinaryOp::Lt => Value::Bool(compare(lhs, rhs) == Some(CmpOrdering::Less)),
            BinaryOp::Gt => Value::Bool(compare(lhs, rhs) == Some(CmpOrdering::Greater)),
            BinaryOp::Le => Value::Bool(matches!(
                compare(lhs, rhs),
                Some(CmpOrdering::Less | CmpOrdering::Equal)
            )),
            BinaryOp::Ge => Value::Bool(matches!(
                compare(lhs, rhs),
                Some(CmpOrdering::Greater | CmpOrdering::Equal)
            )),
            BinaryOp::In => {
                let key = lhs.to_property_key();
                let found = match rhs {
                    Value::Object(obj) => obj.borrow().get(&key).is_some(),
                    Value::Array(items) => {
                        key == "length"
                            || key.parse::<usize>().is_ok_and(|i| i < items.borrow().len())
                    }
                    Value::Function(func) => func.get(&key).is_some(),
                    _ => {
                        return Err(Unwind::type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            rhs.to_js_string()
                        )));
                    }
                };
                Value::Bool(found)
            }
            BinaryOp::InstanceOf => Value::Bool(instance_of(lhs, rhs)?),
        })
    }

    fn construct(
        &mut self,
        constructor: &Value,
        args: Vec<Value>,
        callee: &Expr,
    ) -> Result<Value, Unwind> {
        let not_constructor =
            || Unwind::type_error(format!("{} is not a constructor", callee.describe()));
        let Value::Function(function) = constructor else {
            return Err(not_constructor());
        };
        match &function.kind {
            FunctionKind::Native(_) => self.call_function(constructor, &Value::Undefined, args),
            FunctionKind::Closure { decl, .. } => {
                if decl.is_arrow || decl.is_async {
                    return Err(not_constructor());
                }
                let this = Value::object(Vec::new());
                let result = self.call_function(constructor, &this, args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) | Value::Function(_) => result,
                    _ => this,
                })
            }
        }
    }

    /// Call any function value.
    ///
    /// # Errors
    /// Propagates whatever the callee throws; calling a non-function or
    /// nesting deeper than [`MAX_CALL_DEPTH`] throws as well.
    pub fn call_function(
        &mut self,
        callee: &Value,
        this: &Value,
        args: Vec<Value>,
    ) -> Result<Value, Unwind> {
        let Value::Function(function) = callee else {
            return Err(Unwind::type_error(format!(
                "{} is not a function",
                callee.to_js_string()
            )));
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Unwind::range_error("Maximum call stack size exceeded"));
        }
        self.depth += 1;
        let result = self.invoke(function, this, args);
        self.depth -= 1;
        result
    }

    fn invoke(
        &mut self,
        function: &Rc<Function>,
        this: &Value,
        args: Vec<Value>,
    ) -> Result<Value, Unwind> {
        let (decl, env) = match &function.kind {
            FunctionKind::Native(native) => return native(self, this, args),
            FunctionKind::Closure { decl, env } => (decl, env),
        };

        let call_scope = env.child();
        if !decl.is_arrow {
            call_scope.declare("this", this.clone(), false);
            call_scope.declare("arguments", Value::array(args.clone()), true);
        }
        let mut args = args.into_iter();
        for param in &decl.params {
            call_scope.declare(param, args.next().unwrap_or_default(), true);
        }

        let result = match &decl.body {
            FunctionBody::Block(body) => {
                self.run_body(body, &call_scope)
                    .map(|completion| match completion {
                        Completion::Return(value) => value,
                        _ => Value::Undefined,
                    })
            }
            FunctionBody::Expr(expr) => self.eval(expr, &call_scope),
        };

        if decl.is_async {
            settle(result)
        } else {
            result
        }
    }

    fn await_value(value: Value) -> Result<Value, Unwind> {
        match value.promise_state() {
            Some(PromiseState::Fulfilled(value)) => Ok(value),
            Some(PromiseState::Rejected(reason)) => Err(Unwind::Throw(reason)),
            None => Ok(value),
        }
    }

    /// Read `object[key]`, including the built-in methods of each type.
    ///
    /// # Errors
    /// Reading from `undefined` or `null` throws a `TypeError`.
    pub fn get_property(&mut self, object: &Value, key: &str) -> Result<Value, Unwind> {
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(Unwind::type_error(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    object.to_js_string()
                )));
            }
            Value::Str(s) => {
                if key == "length" {
                    #[allow(clippy::cast_precision_loss)]
                    let len = s.encode_utf16().count() as f64;
                    Value::Number(len)
                } else if let Ok(index) = key.parse::<usize>() {
                    s.chars()
                        .nth(index)
                        .map(|c| Value::from(c.to_string()))
                        .unwrap_or_default()
                } else {
                    builtins::string_method(key).unwrap_or_default()
                }
            }
            Value::Number(_) | Value::Bool(_) => builtins::number_method(key).unwrap_or_default(),
            Value::Array(items) => {
                if key == "length" {
                    #[allow(clippy::cast_precision_loss)]
                    let len = items.borrow().len() as f64;
                    Value::Number(len)
                } else if let Ok(index) = key.parse::<usize>() {
                    items.borrow().get(index).cloned().unwrap_or_default()
                } else {
                    builtins::array_method(key).unwrap_or_default()
                }
            }
            Value::Object(obj) => {
                let own = obj.borrow().get(key);
                if let Some(value) = own {
                    value
                } else {
                    let is_promise = matches!(obj.borrow().kind, ObjectKind::Promise(_));
                    let method = if is_promise {
                        builtins::promise_method(key)
                    } else {
                        None
                    };
                    method
                        .or_else(|| builtins::object_method(key))
                        .unwrap_or_default()
                }
            }
            Value::Function(function) => match function.get(key) {
                Some(value) => value,
                None => match key {
                    "name" => Value::from(function.name.as_str()),
                    "length" => {
                        let arity = match &function.kind {
                            FunctionKind::Closure { decl, .. } => decl.params.len(),
                            FunctionKind::Native(_) => 0,
                        };
                        #[allow(clippy::cast_precision_loss)]
                        let arity = arity as f64;
                        Value::Number(arity)
                    }
                    _ => builtins::function_method(key).unwrap_or_default(),
                },
            },
        };
        Ok(value)
    }

    /// Write `object[key] = value`. Writes to primitives are ignored.
    ///
    /// # Errors
    /// Writing to `undefined` or `null` throws a `TypeError`.
    pub fn set_property(object: &Value, key: &str, value: Value) -> Result<(), Unwind> {
        match object {
            Value::Undefined | Value::Null => Err(Unwind::type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.to_js_string()
            ))),
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 || len > 4_294_967_295.0 {
                        return Err(Unwind::range_error("Invalid array length"));
                    }
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let len = len as usize;
                    if len > items.len() + MAX_ARRAY_GROWTH {
                        return Err(Unwind::range_error("Invalid array length"));
                    }
                    items.resize(len, Value::Undefined);
                } else if let Ok(index) = key.parse::<usize>() {
                    if index >= items.len() {
                        if index > items.len() + MAX_ARRAY_GROWTH {
                            return Err(Unwind::range_error("Invalid array length"));
                        }
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Object(obj) => {
                obj.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Function(function) => {
                function.set(key, value);
                Ok(())
            }
            Value::Bool(_) | Value::Number(_) | Value::Str(_) => Ok(()),
        }
    }

    fn make_closure(decl: &Rc<FunctionDecl>, scope: &Scope, name: Option<&str>) -> Value {
        let name = decl
            .name
            .clone()
            .or_else(|| name.map(str::to_string))
            .unwrap_or_default();
        Value::Function(Rc::new(Function {
            name,
            kind: FunctionKind::Closure {
                decl: Rc::clone(decl),
                env: scope.clone(),
            },
            properties: RefCell::new(Vec::new()),
        }))
    }
}

/// Closures point back at the frames that hold them, so every frame this
/// interpreter created is emptied on drop. An array or object that contains
/// itself (`a.push(a)`) is not tracked and stays allocated.
impl Drop for Interpreter {
    fn drop(&mut self) {
        self.globals.release_frames();
    }
}

/// Turn the outcome of an async function body into a settled promise.
pub fn settle(result: Result<Value, Unwind>) -> Result<Value, Unwind> {
    match result {
        Ok(value) if value.promise_state().is_some() => Ok(value),
        Ok(value) => Ok(Value::promise(PromiseState::Fulfilled(value))),
        Err(Unwind::Throw(reason)) => Ok(Value::promise(PromiseState::Rejected(reason))),
        Err(Unwind::Interrupted) => Err(Unwind::Interrupted),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<CmpOrdering> {
    let (lhs, rhs) = (lhs.to_primitive(), rhs.to_primitive());
    if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
        return Some(a.cmp(b));
    }
    lhs.to_number().partial_cmp(&rhs.to_number())
}

fn instance_of(value: &Value, constructor: &Value) -> Result<bool, Unwind> {
    let Value::Function(constructor) = constructor else {
        return Err(Unwind::type_error(
            "Right-hand side of 'instanceof' is not callable",
        ));
    };
    let name = constructor.name.as_str();
    Ok(match value {
        Value::Object(obj) => {
            let obj = obj.borrow();
            name == "Object"
                || match &obj.kind {
                    ObjectKind::Error => {
                        name == "Error"
                            || obj.get("name").is_some_and(|n| n.to_js_string() == name)
                    }
                    ObjectKind::Promise(_) => name == "Promise",
                    ObjectKind::Plain => false,
                }
        }
        Value::Array(_) => matches!(name, "Array" | "Object"),
        Value::Function(_) => matches!(name, "Function" | "Object"),
        _ => false,
    })
}

fn collect_var_names(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        collect_var_names_in(stmt, out);
    }
}

/// `var` names declared anywhere in a function body, excluding nested
/// functions.
fn collect_var_names_in(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::VarDecl {
            kind: DeclKind::Var,
            declarations,
            ..
        } => out.extend(declarations.iter().map(|(name, _)| name.clone())),
        Stmt::If {
            consequent,
            alternate,
            ..
        } => {
            collect_var_names_in(consequent, out);
            if let Some(alternate) = alternate {
                collect_var_names_in(alternate, out);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_var_names_in(body, out),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_var_names_in(init, out);
            }
            collect_var_names_in(body, out);
        }
        Stmt::ForOf {
            kind, name, body, ..
        } => {
            if *kind == DeclKind::Var {
                out.push(name.clone());
            }
            collect_var_names_in(body, out);
        }
        Stmt::Block(stmts) => collect_var_names(stmts, out),
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            collect_var_names(block, out);
            if let Some(handler) = handler {
                collect_var_names(handler, out);
            }
            if let Some(finalizer) = finalizer {
                collect_var_names(finalizer, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::host::BufferedConsole;
    use crate::script::parser::{ParseMode, parse};

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            Err(FetchError::Disabled)
        }
    }

    fn run(source: &str) -> (Result<Value, ScriptError>, Vec<String>) {
        let console = Rc::new(RefCell::new(BufferedConsole::default()));
        let mut interpreter = Interpreter::new(Box::new(Rc::clone(&console)), Arc::new(NoNetwork));
        let program = parse(source, ParseMode::FunctionBody).unwrap();
        let result = interpreter.run_function_body(&program);
        let lines = console
            .borrow()
            .lines
            .iter()
            .map(|(level, text)| format!("{}{text}", level.prefix()))
            .collect();
        (result, lines)
    }

    fn eval_to_string(source: &str) -> String {
        run(source).0.unwrap().to_js_string()
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(eval_to_string("return 1 + 2 * 3"), "7");
        assert_eq!(eval_to_string("return '1' + 2"), "12");
        assert_eq!(eval_to_string("return 2 ** 10"), "1024");
        assert_eq!(eval_to_string("return 7 % 3"), "1");
        assert_eq!(eval_to_string("return 1 / 0"), "Infinity");
        assert_eq!(eval_to_string("return [1, 2] + ''"), "1,2");
    }

    #[test]
    fn test_dropping_interpreter_breaks_closure_cycles() {
        let source = "
            const make = () => { const inner = () => inner; return inner }
            return make()
        ";
        let (result, _) = run(source);
        let Ok(Value::Function(function)) = result else {
            panic!("expected a function");
        };
        let weak = Rc::downgrade(&function);
        drop(function);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_closures_capture_bindings() {
        let source = "
            function counter() {
                let n = 0
                return () => ++n
            }
            const next = counter()
            next(); next()
            return next()
        ";
        assert_eq!(eval_to_string(source), "3");
    }

    #[test]
    fn test_for_loop_bindings_are_per_iteration() {
        let source = "
            const fns = []
            for (let i = 0; i < 3; i++) { fns.push(() => i) }
            return fns.map(f => f()).join(',')
        ";
        assert_eq!(eval_to_string(source), "0,1,2");
    }

    #[test]
    fn test_loops_break_and_continue() {
        let source = "
            let total = 0
            for (const n of [1, 2, 3, 4, 5, 6]) {
                if (n === 5) break
                if (n % 2) continue
                total += n
            }
            let i = 0
            while (true) { i++; if (i > 3) break }
            do { i-- } while (i > 0)
            return total + i
        ";
        assert_eq!(eval_to_string(source), "6");
    }

    #[test]
    fn test_try_catch_finally() {
        let source = "
            const log = []
            try {
                null.x
            } catch (e) {
                log.push(e instanceof TypeError)
                log.push(e.message)
            } finally {
                log.push('done')
            }
            return log.join('|')
        ";
        assert_eq!(
            eval_to_string(source),
            "true|Cannot read properties of null (reading 'x')|done"
        );
    }

    #[test]
    fn test_uncaught_error_reports_message() {
        let (result, _) = run("throw new Error('boom')");
        let err = result.unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "Uncaught Error: boom");
    }

    #[test]
    fn test_thrown_primitive_has_undefined_message() {
        let (result, _) = run("throw 'oops'");
        let err = result.unwrap_err();
        assert_eq!(err.message(), "undefined");
        assert_eq!(err.to_string(), "Uncaught oops");
    }

    #[test]
    fn test_reference_errors() {
        let (result, _) = run("return missing + 1");
        assert_eq!(result.unwrap_err().message(), "missing is not defined");

        let (result, _) = run("x; let x = 1");
        assert_eq!(
            result.unwrap_err().message(),
            "Cannot access 'x' before initialization"
        );

        assert_eq!(eval_to_string("return typeof missing"), "undefined");
    }

    #[test]
    fn test_const_reassignment_throws() {
        let (result, _) = run("const a = 1; a = 2");
        assert_eq!(result.unwrap_err().message(), "Assignment to constant variable.");
    }

    #[test]
    fn test_not_a_function_message() {
        let (result, _) = run("const obj = {}; obj.missing()");
        assert_eq!(result.unwrap_err().message(), "obj.missing is not a function");
    }

    #[test]
    fn test_optional_chaining_short_circuits() {
        assert_eq!(eval_to_string("const a = null; return a?.b.c"), "undefined");
        assert_eq!(eval_to_string("const a = {b: {c: 4}}; return a?.b.c"), "4");
        assert_eq!(eval_to_string("const a = undefined; return a?.f()"), "undefined");
    }

    #[test]
    fn test_logical_and_nullish() {
        assert_eq!(eval_to_string("return null ?? 'x'"), "x");
        assert_eq!(eval_to_string("return 0 ?? 'x'"), "0");
        assert_eq!(eval_to_string("return 0 || 'x'"), "x");
        assert_eq!(eval_to_string("let a; a ??= 5; return a"), "5");
    }

    #[test]
    fn test_var_hoisting() {
        assert_eq!(
            eval_to_string("function f() { if (true) { var x = 3 } return x } return f()"),
            "3"
        );
        assert_eq!(eval_to_string("return typeof hoisted; var hoisted = 1"), "undefined");
    }

    #[test]
    fn test_function_declarations_are_hoisted() {
        assert_eq!(eval_to_string("return double(4); function double(n) { return n * 2 }"), "8");
    }

    #[test]
    fn test_async_functions_return_promises() {
        let source = "
            async function value() { return 41 }
            const p = value()
            return (await p) + 1
        ";
        assert_eq!(eval_to_string(source), "42");
    }

    #[test]
    fn test_awaiting_rejection_throws() {
        let source = "
            async function fail() { throw new RangeError('nope') }
            try { await fail() } catch (e) { return e.name + ':' + e.message }
        ";
        assert_eq!(eval_to_string(source), "RangeError:nope");
    }

    #[test]
    fn test_returned_promise_is_awaited() {
        let (result, _) = run("return Promise.reject(new Error('late'))");
        assert_eq!(result.unwrap_err().message(), "late");
    }

    #[test]
    fn test_constructor_functions() {
        let source = "
            function Point(x, y) { this.x = x; this.y = y }
            const p = new Point(1, 2)
            return p.x + p.y
        ";
        assert_eq!(eval_to_string(source), "3");
        let (result, _) = run("const f = () => 1; new f()");
        assert_eq!(result.unwrap_err().message(), "f is not a constructor");
    }

    #[test]
    fn test_runaway_recursion_is_range_error() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let (result, _) = run("function f() { return f() } f()");
                result.unwrap_err().message()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), "Maximum call stack size exceeded");
    }

    #[test]
    fn test_interrupt_flag_stops_loops() {
        let console = BufferedConsole::default();
        let flag = Arc::new(AtomicBool::new(true));
        let mut interpreter = Interpreter::new(Box::new(console), Arc::new(NoNetwork))
            .with_interrupt(Arc::clone(&flag));
        let program = parse("while (true) {}", ParseMode::Script).unwrap();
        assert_eq!(interpreter.run_script(&program), Err(ScriptError::Interrupted));
    }

    #[test]
    fn test_console_lines_in_order() {
        let (_, lines) = run("console.log('a', 1); console.warn('b'); console.error('c'); console.info('d')");
        assert_eq!(lines, vec!["a 1", "Warning: b", "Error: c", "Info: d"]);
    }

    #[test]
    fn test_script_mode_var_becomes_global() {
        let console = BufferedConsole::default();
        let mut interpreter = Interpreter::new(Box::new(console), Arc::new(NoNetwork));
        let program = parse("var answer = 42", ParseMode::Script).unwrap();
        interpreter.run_script(&program).unwrap();
        assert_eq!(interpreter.global("answer").unwrap().to_js_string(), "42");
    }
}
