//! Scope resolution state threaded through code generation.
//!
//! [`Context`] is a value: entering a nested script, closure or custom
//! block forks it. [`Session`] is the one mutable handle shared by the
//! whole compilation (used-block work-list, pending statements, inner
//! function sinks, fresh-name counter).

use crate::custom_blocks::{identifier, BlockDefinition};
use crate::python::{Expr, FunctionDef, Stmt};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::rc::Rc;

pub const LOCAL_STORAGE: &str = "_vars";
pub const GLOBAL_STORAGE: &str = "_globals";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarTier {
    Argument,
    Local,
    Global,
}

#[derive(Debug, Clone)]
pub struct Context<'a> {
    function: Option<&'a BlockDefinition>,
    frame: Rc<str>,
    locals: BTreeSet<String>,
    inherited: BTreeSet<String>,
}

impl<'a> Context<'a> {
    pub fn top_level(frame: &str) -> Self {
        Self {
            function: None,
            frame: Rc::from(frame),
            locals: BTreeSet::new(),
            inherited: BTreeSet::new(),
        }
    }

    pub fn for_definition(definition: &'a BlockDefinition) -> Self {
        Self {
            function: Some(definition),
            frame: Rc::from(definition.function_name.as_str()),
            locals: BTreeSet::new(),
            inherited: BTreeSet::new(),
        }
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn enter_closure(&self, frame: &str, params: &[String]) -> Self {
        let mut next = self.clone();
        next.frame = Rc::from(frame);
        next.inherited.extend(params.iter().cloned());
        next
    }

    pub fn with_inherited(&self, names: &[String]) -> Self {
        let mut next = self.clone();
        next.inherited.extend(names.iter().cloned());
        next
    }

    pub fn with_locals<I: IntoIterator<Item = String>>(&self, names: I) -> Self {
        let mut next = self.clone();
        next.locals.extend(names);
        next
    }

    pub fn classify(&self, name: &str) -> VarTier {
        let is_param = self
            .function
            .map(|f| f.param_labels.iter().any(|p| p == name))
            .unwrap_or(false);
        if is_param || self.inherited.contains(name) {
            VarTier::Argument
        } else if self.locals.contains(name) {
            VarTier::Local
        } else {
            VarTier::Global
        }
    }

    pub fn resolve(&self, name: &str) -> Expr {
        match self.classify(name) {
            VarTier::Argument => Expr::Name(self.argument_ident(name)),
            VarTier::Local => Expr::subscript(Expr::name(LOCAL_STORAGE), Expr::str(name)),
            VarTier::Global => Expr::subscript(Expr::name(GLOBAL_STORAGE), Expr::str(name)),
        }
    }

    fn argument_ident(&self, name: &str) -> String {
        if !self.inherited.contains(name) {
            if let Some(ident) = self.function.and_then(|f| f.param_ident(name)) {
                return ident.to_string();
            }
        }
        identifier(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsedBlocks {
    seen: HashSet<String>,
    queue: VecDeque<String>,
    order: Vec<String>,
}

impl UsedBlocks {
    pub fn mark(&mut self, id: &str) {
        if self.seen.insert(id.to_string()) {
            self.queue.push_back(id.to_string());
            self.order.push(id.to_string());
        }
    }

    pub fn next(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }
}

/// Mutable state owned by one compilation run.
#[derive(Debug, Default)]
pub struct Session {
    pub used: UsedBlocks,
    pending: Vec<Stmt>,
    inner: Vec<Vec<FunctionDef>>,
    counter: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let name = format!("{}_{}", prefix, self.counter);
        self.counter += 1;
        name
    }

    pub fn push_pending(&mut self, stmt: Stmt) {
        self.pending.push(stmt);
    }

    pub fn take_pending(&mut self) -> Vec<Stmt> {
        std::mem::take(&mut self.pending)
    }

    pub fn restore_pending(&mut self, saved: Vec<Stmt>) {
        debug_assert!(self.pending.is_empty());
        self.pending = saved;
    }

    pub fn open_function(&mut self) {
        self.inner.push(Vec::new());
    }

    pub fn close_function(&mut self) -> Vec<FunctionDef> {
        self.inner.pop().unwrap_or_default()
    }

    pub fn push_inner(&mut self, def: FunctionDef) {
        match self.inner.last_mut() {
            Some(sink) => sink.push(def),
            None => self.pending.push(Stmt::FunctionDef(def)),
        }
    }
}
