//! Tag tree to Python.
//!
//! Every node kind has one generation rule, dispatched from
//! [`Generator::generate`]. Statements that must exist before the statement
//! being generated (ring functions, spread argument lists) go to the
//! session's pending buffer and are flushed by the enclosing script.

use crate::catalog::{BlockKind, Primitive};
use crate::context::{Context, Session, LOCAL_STORAGE};
use crate::custom_blocks::{identifier, BlockDefinition, CustomBlockRegistry, ParamKind};
use crate::error::{CompileError, Result};
use crate::python::{bound_names, Expr, FunctionDef, Param, Stmt};
use crate::tree::{NodeId, NodeKind, TagTree};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

pub const RUNTIME_MODULE: &str = "stdlib";

const ARGS_PREFIX: &str = "_args";
const RING_PREFIX: &str = "ring";
const COMMAND_PREFIX: &str = "custom_block";
const REST_PARAM: &str = "_";

#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    Nothing,
    Expr(Expr),
    Stmt(Stmt),
    Stmts(Vec<Stmt>),
}

pub fn runtime_call(function: &str, args: Vec<Expr>) -> Expr {
    Expr::call(Expr::attr(RUNTIME_MODULE, function), args)
}

fn report(value: Expr) -> Expr {
    runtime_call("doReport", vec![value])
}

fn integer_text() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([+-]?)0*(\d+)$").expect("static pattern"))
}

pub fn literal(text: &str) -> Expr {
    let Some(caps) = integer_text().captures(text) else {
        return Expr::str(text);
    };
    let digits = &caps[2];
    if &caps[1] == "-" && digits != "0" {
        Expr::Int(format!("-{}", digits))
    } else {
        Expr::Int(digits.to_string())
    }
}

enum ClosureBody {
    Commands(Option<NodeId>),
    Reporter(Option<NodeId>),
}

pub struct Generator<'a> {
    tree: &'a TagTree,
    registry: &'a CustomBlockRegistry,
    session: Session,
}

impl<'a> Generator<'a> {
    pub fn new(tree: &'a TagTree, registry: &'a CustomBlockRegistry) -> Self {
        Self {
            tree,
            registry,
            session: Session::new(),
        }
    }

    pub fn next_used(&mut self) -> Option<String> {
        self.session.used.next()
    }

    pub fn used_blocks(&self) -> &[String] {
        self.session.used.order()
    }

    pub fn generate(&mut self, node: NodeId, ctx: &Context<'a>) -> Result<Generated> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Literal => Ok(Generated::Expr(literal(&tree.text(node)))),
            NodeKind::List => {
                let items = self.expressions(&tree.operands(node), ctx)?;
                Ok(Generated::Expr(Expr::List(items)))
            }
            NodeKind::Script => Ok(Generated::Stmts(self.script(node, ctx)?)),
            NodeKind::AutoLambda => match tree.operands(node).first() {
                Some(inner) => self.generate(*inner, ctx),
                None => Ok(Generated::Expr(Expr::NoneLit)),
            },
            NodeKind::Block(BlockKind::Variable(name)) => Ok(Generated::Expr(ctx.resolve(name))),
            NodeKind::Block(BlockKind::Unimplemented(selector)) => {
                Err(CompileError::UnsupportedOperation {
                    selector: selector.clone(),
                })
            }
            NodeKind::Block(BlockKind::Primitive(primitive)) => {
                self.primitive(*primitive, node, ctx)
            }
            NodeKind::CustomBlock { selector } => {
                Ok(Generated::Expr(self.custom_block_call(node, selector, ctx)?))
            }
            NodeKind::BlockDefinition => {
                let registry = self.registry;
                let definition = registry.by_node(node).ok_or_else(|| {
                    CompileError::structure("block definition was never registered")
                })?;
                let function = self.definition_function(definition)?;
                Ok(Generated::Stmt(Stmt::FunctionDef(function)))
            }
            NodeKind::Tag | NodeKind::Option | NodeKind::Input => Err(CompileError::structure(
                format!("'{}' cannot be generated", tree.get(node).name),
            )),
        }
    }

    pub fn script_function(&mut self, name: &str, script: NodeId) -> Result<FunctionDef> {
        debug!(function = name, "generating script");
        let ctx = Context::top_level(name);
        let body = self.function_body(Some(script), &ctx)?;
        Ok(FunctionDef {
            name: name.to_string(),
            params: Vec::new(),
            rest: None,
            body,
        })
    }

    pub fn definition_function(&mut self, definition: &'a BlockDefinition) -> Result<FunctionDef> {
        debug!(
            id = %definition.canonical_id,
            function = %definition.function_name,
            "generating custom block"
        );
        let ctx = Context::for_definition(definition);
        let body = self.function_body(definition.script, &ctx)?;
        Ok(FunctionDef {
            name: definition.function_name.clone(),
            params: definition.param_idents.iter().map(Param::plain).collect(),
            rest: None,
            body,
        })
    }

    fn function_body(&mut self, script: Option<NodeId>, ctx: &Context<'a>) -> Result<Vec<Stmt>> {
        let script = match script {
            Some(s) if !self.tree.operands(s).is_empty() => s,
            _ => return Ok(vec![Stmt::Pass]),
        };
        self.session.open_function();
        let body = self.script(script, ctx);
        let inner = self.session.close_function();
        let body = body?;

        let mut out = vec![Stmt::Assign(Expr::name(LOCAL_STORAGE), Expr::EmptyDict)];
        out.extend(inner.into_iter().map(Stmt::FunctionDef));
        out.extend(body);
        Ok(out)
    }

    pub fn script(&mut self, node: NodeId, ctx: &Context<'a>) -> Result<Vec<Stmt>> {
        let ctx = ctx.with_locals(self.declared_locals(node));
        let saved = self.session.take_pending();
        let result = self.script_statements(node, &ctx);
        if result.is_err() {
            self.session.take_pending();
        }
        self.session.restore_pending(saved);

        let mut stmts = result?;
        if stmts.is_empty() {
            stmts.push(Stmt::Pass);
        }
        Ok(stmts)
    }

    fn script_statements(&mut self, node: NodeId, ctx: &Context<'a>) -> Result<Vec<Stmt>> {
        let mut out = Vec::new();
        for op in self.tree.operands(node) {
            let generated = self.generate(op, ctx)?;
            out.extend(self.session.take_pending());
            match generated {
                Generated::Nothing => {}
                Generated::Expr(e) => out.push(Stmt::Expr(e)),
                Generated::Stmt(s) => out.push(s),
                Generated::Stmts(stmts) => out.extend(stmts),
            }
        }
        Ok(out)
    }

    /// Names declared by the script's own declare-variables blocks. They
    /// are local for the whole script regardless of where the declaration
    /// sits.
    fn declared_locals(&self, script: NodeId) -> Vec<String> {
        let tree = self.tree;
        let mut names = Vec::new();
        for op in tree.operands(script) {
            if tree.kind(op) != &NodeKind::Block(BlockKind::Primitive(Primitive::DoDeclareVariables))
            {
                continue;
            }
            for child in tree.operands(op) {
                match tree.kind(child) {
                    NodeKind::List => names.extend(self.literal_names(child)),
                    NodeKind::Literal => names.push(tree.text(child)),
                    _ => {}
                }
            }
        }
        names.retain(|n| !n.is_empty());
        names
    }

    fn literal_names(&self, list: NodeId) -> Vec<String> {
        let tree = self.tree;
        tree.operands(list)
            .into_iter()
            .filter(|c| tree.kind(*c) == &NodeKind::Literal)
            .map(|c| tree.text(c))
            .filter(|n| !n.is_empty())
            .collect()
    }

    fn expression(&mut self, node: NodeId, ctx: &Context<'a>) -> Result<Expr> {
        match self.generate(node, ctx)? {
            Generated::Expr(e) => Ok(e),
            _ => Err(CompileError::structure(format!(
                "'{}' does not report a value",
                self.describe(node)
            ))),
        }
    }

    fn expressions(&mut self, nodes: &[NodeId], ctx: &Context<'a>) -> Result<Vec<Expr>> {
        nodes.iter().map(|n| self.expression(*n, ctx)).collect()
    }

    fn describe(&self, node: NodeId) -> String {
        match self.tree.kind(node) {
            NodeKind::Block(kind) => kind.block_name().to_string(),
            NodeKind::CustomBlock { selector } => selector.clone(),
            _ => self.tree.get(node).name.clone(),
        }
    }

    fn input(&self, ops: &[NodeId], index: usize, primitive: Primitive) -> Result<NodeId> {
        ops.get(index).copied().ok_or_else(|| {
            CompileError::structure(format!(
                "'{}' is missing input {}",
                primitive.selector(),
                index + 1
            ))
        })
    }

    fn operand(
        &mut self,
        ops: &[NodeId],
        index: usize,
        primitive: Primitive,
        ctx: &Context<'a>,
    ) -> Result<Expr> {
        let node = self.input(ops, index, primitive)?;
        self.expression(node, ctx)
    }

    fn name_input(&self, ops: &[NodeId], index: usize, primitive: Primitive) -> Result<String> {
        let node = self.input(ops, index, primitive)?;
        let name = match self.tree.kind(node) {
            NodeKind::Literal => self.tree.text(node),
            _ => String::new(),
        };
        if name.is_empty() {
            return Err(CompileError::structure(format!(
                "'{}' needs a variable name",
                primitive.selector()
            )));
        }
        Ok(name)
    }

    fn condition(&mut self, node: Option<NodeId>, ctx: &Context<'a>) -> Result<Expr> {
        match node {
            None => Ok(Expr::Bool(false)),
            Some(n) if self.tree.kind(n) == &NodeKind::Literal && self.tree.text(n).is_empty() => {
                Ok(Expr::Bool(false))
            }
            Some(n) => self.expression(n, ctx),
        }
    }

    fn branch(&mut self, node: Option<NodeId>, ctx: &Context<'a>) -> Result<Vec<Stmt>> {
        match node {
            Some(n) if self.tree.kind(n) == &NodeKind::Script => self.script(n, ctx),
            _ => Ok(vec![Stmt::Pass]),
        }
    }

    fn primitive(
        &mut self,
        primitive: Primitive,
        node: NodeId,
        ctx: &Context<'a>,
    ) -> Result<Generated> {
        if primitive.is_hat() {
            debug!(hat = primitive.selector(), "skipping hat block");
            return Ok(Generated::Nothing);
        }
        let ops = self.tree.operands(node);
        let generated = match primitive {
            Primitive::DoIf => Generated::Stmt(Stmt::If {
                test: self.condition(ops.first().copied(), ctx)?,
                body: self.branch(ops.get(1).copied(), ctx)?,
                orelse: Vec::new(),
            }),
            Primitive::DoIfElse => Generated::Stmt(Stmt::If {
                test: self.condition(ops.first().copied(), ctx)?,
                body: self.branch(ops.get(1).copied(), ctx)?,
                orelse: self.branch(ops.get(2).copied(), ctx)?,
            }),
            Primitive::DoUntil => Generated::Stmt(self.until(&ops, ctx)?),
            Primitive::DoRepeat => {
                let count = self.operand(&ops, 0, primitive, ctx)?;
                Generated::Stmt(Stmt::For {
                    target: REST_PARAM.to_string(),
                    iter: Expr::call(Expr::name("range"), vec![count]),
                    body: self.branch(ops.get(1).copied(), ctx)?,
                })
            }
            Primitive::DoForEach => {
                let var = self.name_input(&ops, 0, primitive)?;
                let iter = self.operand(&ops, 1, primitive, ctx)?;
                let body_ctx = ctx.with_inherited(&[var.clone()]);
                Generated::Stmt(Stmt::For {
                    target: identifier(&var),
                    iter,
                    body: self.branch(ops.get(2).copied(), &body_ctx)?,
                })
            }
            Primitive::DoWarp => Generated::Stmts(self.branch(ops.first().copied(), ctx)?),
            Primitive::DoReport => {
                let value = match ops.first() {
                    Some(op) => self.expression(*op, ctx)?,
                    None => Expr::NoneLit,
                };
                Generated::Stmt(Stmt::Return(runtime_call(
                    "doReport",
                    vec![value, Expr::str(ctx.frame())],
                )))
            }
            Primitive::DoRun => Generated::Stmt(Stmt::Expr(self.invocation(&ops, primitive, ctx)?)),
            Primitive::Evaluate => Generated::Expr(report(self.invocation(&ops, primitive, ctx)?)),
            Primitive::ReifyReporter | Primitive::ReifyPredicate | Primitive::ReifyScript => {
                Generated::Expr(self.ring(&ops, primitive, ctx)?)
            }

            Primitive::ReportTrue => Generated::Expr(report(Expr::Bool(true))),
            Primitive::ReportFalse => Generated::Expr(report(Expr::Bool(false))),
            Primitive::ReportNot => {
                let operand = self.operand(&ops, 0, primitive, ctx)?;
                Generated::Expr(report(Expr::not(operand)))
            }
            Primitive::ReportAnd => self.binary(&ops, primitive, "and", ctx)?,
            Primitive::ReportOr => self.binary(&ops, primitive, "or", ctx)?,
            Primitive::ReportLessThan => self.binary(&ops, primitive, "<", ctx)?,
            Primitive::ReportGreaterThan => self.binary(&ops, primitive, ">", ctx)?,
            Primitive::ReportSum => self.binary(&ops, primitive, "+", ctx)?,
            Primitive::ReportDifference => self.binary(&ops, primitive, "-", ctx)?,
            Primitive::ReportProduct => self.binary(&ops, primitive, "*", ctx)?,
            Primitive::ReportQuotient => self.binary(&ops, primitive, "/", ctx)?,
            Primitive::ReportModulus => self.binary(&ops, primitive, "%", ctx)?,
            Primitive::ReportEquals => self.runtime(&ops, primitive, "equals", &[0, 1], ctx)?,
            Primitive::ReportJoinWords => {
                let tree = self.tree;
                let items = match ops.as_slice() {
                    [list] if tree.kind(*list) == &NodeKind::List => tree.operands(*list),
                    _ => ops.clone(),
                };
                let items = self.expressions(&items, ctx)?;
                Generated::Expr(report(runtime_call("joinWords", vec![Expr::List(items)])))
            }
            Primitive::ReportLetter => self.runtime(&ops, primitive, "letterOf", &[0, 1], ctx)?,
            Primitive::ReportStringSize => self.runtime(&ops, primitive, "lengthOf", &[0], ctx)?,

            Primitive::DoSetVar => {
                let name = self.name_input(&ops, 0, primitive)?;
                let value = match ops.get(1) {
                    Some(op) => self.expression(*op, ctx)?,
                    None => Expr::str(""),
                };
                Generated::Stmt(Stmt::Assign(ctx.resolve(&name), value))
            }
            Primitive::DoChangeVar => {
                let name = self.name_input(&ops, 0, primitive)?;
                let delta = self.operand(&ops, 1, primitive, ctx)?;
                let target = ctx.resolve(&name);
                Generated::Stmt(Stmt::Assign(
                    target.clone(),
                    Expr::binop(target, "+", delta),
                ))
            }
            // Picked up by the enclosing script before its statements.
            Primitive::DoDeclareVariables => Generated::Nothing,
            Primitive::ReportNewList => {
                let tree = self.tree;
                let list = ops
                    .iter()
                    .copied()
                    .find(|o| tree.kind(*o) == &NodeKind::List)
                    .ok_or_else(|| {
                        CompileError::structure("'reportNewList' is missing its 'list' child")
                    })?;
                let items = self.expressions(&tree.operands(list), ctx)?;
                Generated::Expr(report(Expr::List(items)))
            }
            Primitive::ReportCons => self.runtime(&ops, primitive, "cons", &[0, 1], ctx)?,
            Primitive::ReportCar => self.runtime(&ops, primitive, "car", &[0], ctx)?,
            Primitive::ReportCdr => self.runtime(&ops, primitive, "cdr", &[0], ctx)?,
            Primitive::ReportListItem => self.runtime(&ops, primitive, "itemOf", &[0, 1], ctx)?,
            Primitive::ReportListLength => self.runtime(&ops, primitive, "lengthOf", &[0], ctx)?,
            // contains(list, item): the block reads "list contains item".
            Primitive::ReportListContainsItem => {
                self.runtime(&ops, primitive, "contains", &[0, 1], ctx)?
            }
            Primitive::DoAddToList => {
                let item = self.operand(&ops, 0, primitive, ctx)?;
                let list = self.operand(&ops, 1, primitive, ctx)?;
                Generated::Stmt(Stmt::Expr(runtime_call("append", vec![item, list])))
            }
            Primitive::DoInsertInList => Generated::Stmt(self.insert(&ops, ctx)?),

            // Handled above.
            Primitive::ReceiveGo
            | Primitive::ReceiveKey
            | Primitive::ReceiveClick
            | Primitive::ReceiveInteraction
            | Primitive::ReceiveMessage
            | Primitive::ReceiveCondition => Generated::Nothing,
        };
        Ok(generated)
    }

    fn binary(
        &mut self,
        ops: &[NodeId],
        primitive: Primitive,
        op: &'static str,
        ctx: &Context<'a>,
    ) -> Result<Generated> {
        let left = self.operand(ops, 0, primitive, ctx)?;
        let right = self.operand(ops, 1, primitive, ctx)?;
        Ok(Generated::Expr(report(Expr::binop(left, op, right))))
    }

    fn runtime(
        &mut self,
        ops: &[NodeId],
        primitive: Primitive,
        function: &str,
        indices: &[usize],
        ctx: &Context<'a>,
    ) -> Result<Generated> {
        let mut args = Vec::with_capacity(indices.len());
        for index in indices {
            args.push(self.operand(ops, *index, primitive, ctx)?);
        }
        Ok(Generated::Expr(report(runtime_call(function, args))))
    }

    /// `while (not cond):`. A condition that needs setup statements is
    /// re-evaluated every pass: `while True:` with the setup and a `break`.
    fn until(&mut self, ops: &[NodeId], ctx: &Context<'a>) -> Result<Stmt> {
        let saved = self.session.take_pending();
        let test = self.condition(ops.first().copied(), ctx);
        let setup = self.session.take_pending();
        self.session.restore_pending(saved);
        let test = test?;
        let body = self.branch(ops.get(1).copied(), ctx)?;

        if setup.is_empty() {
            return Ok(Stmt::While {
                test: Expr::not(test),
                body,
            });
        }
        let mut looped = setup;
        looped.push(Stmt::If {
            test,
            body: vec![Stmt::Break],
            orelse: Vec::new(),
        });
        if body != [Stmt::Pass] {
            looped.extend(body);
        }
        Ok(Stmt::While {
            test: Expr::Bool(true),
            body: looped,
        })
    }

    fn insert(&mut self, ops: &[NodeId], ctx: &Context<'a>) -> Result<Stmt> {
        let primitive = Primitive::DoInsertInList;
        let item = self.operand(ops, 0, primitive, ctx)?;
        let position = self.input(ops, 1, primitive)?;
        let list = self.operand(ops, 2, primitive, ctx)?;

        let call = if self.tree.kind(position) == &NodeKind::Literal {
            let text = self.tree.text(position);
            match text.as_str() {
                "" | "last" | "any" => runtime_call("append", vec![item, list]),
                "1" => runtime_call("insertAtFront", vec![item, list]),
                _ => runtime_call("insertAt", vec![literal(&text), item, list]),
            }
        } else {
            let index = self.expression(position, ctx)?;
            runtime_call("insertAt", vec![index, item, list])
        };
        Ok(Stmt::Expr(call))
    }

    fn invocation(&mut self, ops: &[NodeId], primitive: Primitive, ctx: &Context<'a>) -> Result<Expr> {
        let tree = self.tree;
        let target = self.input(ops, 0, primitive)?;
        let callee = self.callable(target, ctx)?;

        let items = match ops.get(1) {
            Some(list) if tree.kind(*list) == &NodeKind::List => tree.operands(*list),
            _ => Vec::new(),
        };
        if items.is_empty() {
            return Ok(Expr::call(callee, Vec::new()));
        }
        let items = self.expressions(&items, ctx)?;
        let temp = self.session.fresh_name(ARGS_PREFIX);
        self.session
            .push_pending(Stmt::Assign(Expr::name(&temp), Expr::List(items)));
        Ok(Expr::call(
            callee,
            vec![Expr::Starred(Box::new(Expr::name(temp)))],
        ))
    }

    /// A custom block placed directly in a callable slot names its
    /// function instead of calling it.
    fn callable(&mut self, target: NodeId, ctx: &Context<'a>) -> Result<Expr> {
        let tree = self.tree;
        match tree.kind(target) {
            NodeKind::CustomBlock { selector } => {
                let registry = self.registry;
                let definition = registry.resolve(selector)?;
                self.session.used.mark(&definition.canonical_id);
                Ok(Expr::name(&definition.function_name))
            }
            _ => self.expression(target, ctx),
        }
    }

    fn ring(&mut self, ops: &[NodeId], primitive: Primitive, ctx: &Context<'a>) -> Result<Expr> {
        let tree = self.tree;
        let params = ops
            .iter()
            .copied()
            .filter(|o| tree.kind(*o) == &NodeKind::List)
            .last()
            .map(|list| self.literal_names(list))
            .unwrap_or_default();
        let content = ops
            .iter()
            .copied()
            .find(|o| tree.kind(*o) != &NodeKind::List);
        let body = match primitive {
            Primitive::ReifyScript => {
                ClosureBody::Commands(content.filter(|c| tree.kind(*c) == &NodeKind::Script))
            }
            _ => ClosureBody::Reporter(content),
        };

        let name = self.session.fresh_name(RING_PREFIX);
        let function = self.closure(&name, &params, body, ctx)?;
        self.session.push_pending(Stmt::FunctionDef(function));
        Ok(Expr::name(name))
    }

    fn closure(
        &mut self,
        name: &str,
        params: &[String],
        body: ClosureBody,
        ctx: &Context<'a>,
    ) -> Result<FunctionDef> {
        let inner_ctx = ctx.enter_closure(name, params);
        let saved = self.session.take_pending();
        self.session.open_function();
        let generated = match body {
            ClosureBody::Commands(Some(script)) => self.script(script, &inner_ctx),
            ClosureBody::Commands(None) => Ok(vec![Stmt::Pass]),
            ClosureBody::Reporter(Some(node)) => match self.expression(node, &inner_ctx) {
                Ok(value) => {
                    let mut stmts = self.session.take_pending();
                    stmts.push(Stmt::Return(value));
                    Ok(stmts)
                }
                Err(e) => Err(e),
            },
            ClosureBody::Reporter(None) => Ok(vec![Stmt::Return(Expr::NoneLit)]),
        };
        let inner = self.session.close_function();
        self.session.take_pending();
        self.session.restore_pending(saved);
        let generated = generated?;

        let idents = params.iter().map(|p| identifier(p)).collect::<Vec<_>>();
        let mut body = Vec::new();
        let write_backs = write_backs(&generated, &idents);
        if !write_backs.is_empty() {
            body.push(Stmt::Nonlocal(write_backs));
        }
        body.extend(inner.into_iter().map(Stmt::FunctionDef));
        body.extend(generated);

        Ok(FunctionDef {
            name: name.to_string(),
            params: idents.into_iter().map(Param::optional).collect(),
            rest: Some(REST_PARAM.to_string()),
            body,
        })
    }

    fn custom_block_call(&mut self, node: NodeId, selector: &str, ctx: &Context<'a>) -> Result<Expr> {
        let registry = self.registry;
        let callee = registry.resolve(selector)?;
        self.session.used.mark(&callee.canonical_id);

        let ops = self.tree.operands(node);
        if ops.len() != callee.param_types.len() {
            return Err(CompileError::argument_shape(format!(
                "'{}' expects {} argument(s) but the call passes {}",
                callee.canonical_id,
                callee.param_types.len(),
                ops.len()
            )));
        }
        let upvars = self.upvar_names(&ops, callee);
        let mut upvar_slots = upvars.iter();
        let mut args = Vec::with_capacity(ops.len());
        for (op, param) in ops.iter().zip(callee.param_types.iter()) {
            let arg = match param.kind() {
                // Upvars are not bound back into the caller; the callee
                // gets the name the caller chose.
                ParamKind::Upvar => Expr::str(upvar_slots.next().cloned().unwrap_or_default()),
                kind => self.argument(*op, kind, &upvars, ctx)?,
            };
            args.push(arg);
        }
        Ok(Expr::call(Expr::name(&callee.function_name), args))
    }

    /// Names the caller wrote into the callee's upvar slots. A blank slot
    /// keeps the callee's own name.
    fn upvar_names(&self, ops: &[NodeId], callee: &BlockDefinition) -> Vec<String> {
        let tree = self.tree;
        ops.iter()
            .zip(callee.param_types.iter().zip(callee.param_labels.iter()))
            .filter(|(_, (param, _))| param.kind() == ParamKind::Upvar)
            .map(|(op, (_, label))| match tree.kind(*op) {
                NodeKind::Literal if !tree.text(*op).is_empty() => tree.text(*op),
                _ => label.clone(),
            })
            .collect()
    }

    fn argument(
        &mut self,
        op: NodeId,
        kind: ParamKind,
        upvars: &[String],
        ctx: &Context<'a>,
    ) -> Result<Expr> {
        let tree = self.tree;
        match (kind, tree.kind(op)) {
            (_, NodeKind::Script) => {
                let name = self.session.fresh_name(COMMAND_PREFIX);
                let function =
                    self.closure(&name, upvars, ClosureBody::Commands(Some(op)), ctx)?;
                self.session.push_inner(function);
                Ok(Expr::name(name))
            }
            (ParamKind::CommandSequence, NodeKind::Literal) => Ok(Expr::NoneLit),
            _ => self.expression(op, ctx),
        }
    }
}

/// Names a closure assigns that belong to an enclosing function and so
/// need `nonlocal`.
fn write_backs(body: &[Stmt], params: &[String]) -> Vec<String> {
    let (assigned, loop_targets) = bound_names(body);
    let temp_prefix = format!("{}_", ARGS_PREFIX);
    assigned
        .into_iter()
        .filter(|n| !params.contains(n))
        .filter(|n| !loop_targets.contains(n))
        .filter(|n| !n.starts_with(&temp_prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::read_tree;

    fn render(xml: &str) -> Result<String> {
        let tree = read_tree(xml)?;
        let registry = CustomBlockRegistry::new();
        let mut generator = Generator::new(&tree, &registry);
        let function = generator.script_function("main_0", tree.roots()[0])?;
        Ok(Stmt::FunctionDef(function).render())
    }

    #[test]
    fn literal_type_inference() {
        assert_eq!(literal("4"), Expr::int(4));
        assert_eq!(literal("-2"), Expr::int(-2));
        assert_eq!(literal("4.5"), Expr::str("4.5"));
        assert_eq!(literal("hello"), Expr::str("hello"));
        assert_eq!(literal(""), Expr::str(""));
    }

    #[test]
    fn integer_literals_are_not_limited_to_64_bits() {
        assert_eq!(
            literal("99999999999999999999").render(),
            "99999999999999999999"
        );
        assert_eq!(literal("-0042").render(), "(-42)");
        assert_eq!(literal("+7").render(), "7");
        assert_eq!(literal("-0").render(), "0");
        assert_eq!(literal("1e3"), Expr::str("1e3"));
    }

    #[test]
    fn set_var_without_declaration_is_global() {
        let out = render(r#"<script><block s="doSetVar"><l>i</l><l>hello</l></block></script>"#)
            .unwrap();
        assert_eq!(out, "def main_0():\n    _vars = {}\n    _globals['i'] = 'hello'\n");
    }

    #[test]
    fn declared_variables_are_local_from_the_start() {
        let out = render(
            r#"<script>
                 <block s="doSetVar"><l>n</l><l>4</l></block>
                 <block s="doDeclareVariables"><list><l>n</l></list></block>
                 <block s="doChangeVar"><l>n</l><l>1</l></block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    _vars['n'] = 4\n    _vars['n'] = (_vars['n'] + 1)\n"
        );
    }

    #[test]
    fn until_negates_its_condition() {
        let out = render(
            r#"<script><block s="doUntil">
                 <block s="reportEquals"><block var="n"/><l>3</l></block>
                 <script><block s="doChangeVar"><l>n</l><l>1</l></block></script>
               </block></script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    while (not stdlib.doReport(stdlib.equals(_globals['n'], 3))):\n        _globals['n'] = (_globals['n'] + 1)\n"
        );
    }

    #[test]
    fn until_with_spread_call_reevaluates_setup() {
        let out = render(
            r#"<script><block s="doUntil">
                 <block s="evaluate"><block var="done"/><list><l>1</l></list></block>
                 <script/>
               </block></script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    while True:\n        _args_0 = [1]\n        if stdlib.doReport(_globals['done'](*_args_0)):\n            break\n"
        );
    }

    #[test]
    fn for_each_binds_loop_variable_as_argument() {
        let out = render(
            r#"<script><block s="doForEach"><l>w</l>
                 <block s="reportNewList"><list><l>a</l><l>b</l></list></block>
                 <script><block s="doReport"><block s="reportLetter"><l>1</l><block var="w"/></block></block></script>
               </block>
               <block s="doSetVar"><l>x</l><block var="w"/></block></script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    for w in stdlib.doReport(['a', 'b']):\n        return stdlib.doReport(stdlib.doReport(stdlib.letterOf(1, w)), 'main_0')\n    _globals['x'] = _globals['w']\n"
        );
    }

    #[test]
    fn ring_is_defined_before_use_and_called_with_spread_args() {
        let out = render(
            r#"<script>
                 <block s="doSetVar"><l>f</l>
                   <block s="reifyReporter">
                     <autolambda><block s="reportSum"><block var="x"/><l>1</l></block></autolambda>
                     <list><l>x</l></list>
                   </block>
                 </block>
                 <block s="doSetVar"><l>y</l>
                   <block s="evaluate"><block var="f"/><list><l>41</l></list></block>
                 </block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n\n    def ring_0(x=None, *_):\n        return stdlib.doReport((x + 1))\n    _globals['f'] = ring_0\n    _args_1 = [41]\n    _globals['y'] = stdlib.doReport(_globals['f'](*_args_1))\n"
        );
    }

    #[test]
    fn command_ring_writes_back_to_enclosing_binding() {
        let out = render(
            r#"<script><block s="doForEach"><l>w</l><block var="words"/>
                 <script>
                   <block s="doRun">
                     <block s="reifyScript">
                       <script><block s="doSetVar"><l>w</l><l>seen</l></block></script>
                       <list/>
                     </block>
                   </block>
                 </script>
               </block></script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    for w in _globals['words']:\n        def ring_0(*_):\n            nonlocal w\n            w = 'seen'\n        ring_0()\n"
        );
    }

    #[test]
    fn empty_condition_and_body() {
        let out = render(r#"<script><block s="doIf"><l/><script/></block></script>"#).unwrap();
        assert_eq!(out, "def main_0():\n    _vars = {}\n    if False:\n        pass\n");
    }

    #[test]
    fn hat_blocks_generate_nothing() {
        let out = render(
            r#"<script><block s="receiveGo"/><block s="doAddToList"><l>x</l><block var="xs"/></block></script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    stdlib.append('x', _globals['xs'])\n"
        );
    }

    #[test]
    fn insert_position_picks_runtime_helper() {
        let out = render(
            r#"<script>
                 <block s="doInsertInList"><l>a</l><l><option>last</option></l><block var="xs"/></block>
                 <block s="doInsertInList"><l>b</l><l>1</l><block var="xs"/></block>
                 <block s="doInsertInList"><l>c</l><l>3</l><block var="xs"/></block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():\n    _vars = {}\n    stdlib.append('a', _globals['xs'])\n    stdlib.insertAtFront('b', _globals['xs'])\n    stdlib.insertAt(3, 'c', _globals['xs'])\n"
        );
    }

    #[test]
    fn list_reporters_call_the_runtime() {
        let out = render(
            r#"<script>
                 <block s="reportCONS"><l>a</l><block var="xs"/></block>
                 <block s="reportCAR"><block var="xs"/></block>
                 <block s="reportCDR"><block var="xs"/></block>
                 <block s="reportListItem"><l>2</l><block var="xs"/></block>
                 <block s="reportListItem"><l><option>last</option></l><block var="xs"/></block>
                 <block s="reportListLength"><block var="xs"/></block>
                 <block s="reportListContainsItem"><block var="xs"/><l>b</l></block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():
    _vars = {}
    stdlib.doReport(stdlib.cons('a', _globals['xs']))
    stdlib.doReport(stdlib.car(_globals['xs']))
    stdlib.doReport(stdlib.cdr(_globals['xs']))
    stdlib.doReport(stdlib.itemOf(2, _globals['xs']))
    stdlib.doReport(stdlib.itemOf('last', _globals['xs']))
    stdlib.doReport(stdlib.lengthOf(_globals['xs']))
    stdlib.doReport(stdlib.contains(_globals['xs'], 'b'))
"
        );
    }

    #[test]
    fn logic_and_arithmetic_operators() {
        let out = render(
            r#"<script>
                 <block s="reportNot"><block s="reportFalse"/></block>
                 <block s="reportOr"><block s="reportTrue"/><block s="reportFalse"/></block>
                 <block s="reportDifference"><l>5</l><l>2</l></block>
                 <block s="reportQuotient"><l>6</l><l>4</l></block>
                 <block s="reportModulus"><l>7</l><l>3</l></block>
                 <block s="reportSum"><l>99999999999999999999</l><l>1</l></block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():
    _vars = {}
    stdlib.doReport((not stdlib.doReport(False)))
    stdlib.doReport((stdlib.doReport(True) or stdlib.doReport(False)))
    stdlib.doReport((5 - 2))
    stdlib.doReport((6 / 4))
    stdlib.doReport((7 % 3))
    stdlib.doReport((99999999999999999999 + 1))
"
        );
    }

    #[test]
    fn repeat_warp_and_if_else() {
        let out = render(
            r#"<script>
                 <block s="doRepeat"><l>3</l>
                   <script><block s="doChangeVar"><l>n</l><l>1</l></block></script>
                 </block>
                 <block s="doWarp">
                   <script>
                     <block s="doSetVar"><l>a</l><l>1</l></block>
                     <block s="doSetVar"><l>b</l><l>2</l></block>
                   </script>
                 </block>
                 <block s="doIfElse">
                   <block s="reportLessThan"><block var="a"/><block var="b"/></block>
                   <script><block s="doSetVar"><l>m</l><block var="a"/></block></script>
                   <script><block s="doSetVar"><l>m</l><block var="b"/></block></script>
                 </block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():
    _vars = {}
    for _ in range(3):
        _globals['n'] = (_globals['n'] + 1)
    _globals['a'] = 1
    _globals['b'] = 2
    if stdlib.doReport((_globals['a'] < _globals['b'])):
        _globals['m'] = _globals['a']
    else:
        _globals['m'] = _globals['b']
"
        );
    }

    #[test]
    fn predicate_and_script_rings_take_their_parameters() {
        let out = render(
            r#"<script>
                 <block s="doSetVar"><l>p</l>
                   <block s="reifyPredicate">
                     <autolambda><block s="reportGreaterThan"><block var="x"/><l>0</l></block></autolambda>
                     <list><l>x</l></list>
                   </block>
                 </block>
                 <block s="doSetVar"><l>c</l>
                   <block s="reifyScript">
                     <script><block s="doAddToList"><block var="v"/><block var="xs"/></block></script>
                     <list><l>v</l></list>
                   </block>
                 </block>
               </script>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            "def main_0():
    _vars = {}

    def ring_0(x=None, *_):
        return stdlib.doReport((x > 0))
    _globals['p'] = ring_0

    def ring_1(v=None, *_):
        stdlib.append(v, _globals['xs'])
    _globals['c'] = ring_1
"
        );
    }

    #[test]
    fn empty_script_is_pass() {
        assert_eq!(render("<script/>").unwrap(), "def main_0():\n    pass\n");
    }

    #[test]
    fn unsupported_selector_fails_when_generated() {
        let err = render(r#"<script><block s="forward"><l>10</l></block></script>"#).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedOperation {
                selector: "forward".to_string()
            }
        );
    }

    #[test]
    fn new_list_requires_list_child() {
        let err = render(r#"<script><block s="doSetVar"><l>x</l><block s="reportNewList"/></block></script>"#)
            .unwrap_err();
        assert!(matches!(err, CompileError::Structure(_)));
    }

    #[test]
    fn unknown_custom_block_lists_known_ids() {
        let err = render(r#"<script><custom-block s="missing %s"><l>1</l></custom-block></script>"#)
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedCustomBlock {
                requested: "missing %s".to_string(),
                known: Vec::new(),
            }
        );
    }
}
