use std::collections::BTreeSet;

pub const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    /// Decimal digits with an optional leading `-`, any size.
    Int(String),
    Str(String),
    Bool(bool),
    NoneLit,
    List(Vec<Expr>),
    EmptyDict,
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Starred(Box<Expr>),
    BinOp(Box<Expr>, &'static str, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Int(value.to_string())
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Str(value.into())
    }

    pub fn attr(base: &str, attr: &str) -> Self {
        Expr::Attribute(Box::new(Expr::name(base)), attr.to_string())
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        Expr::Call(Box::new(func), args)
    }

    pub fn subscript(base: Expr, index: Expr) -> Self {
        Expr::Subscript(Box::new(base), Box::new(index))
    }

    pub fn binop(left: Expr, op: &'static str, right: Expr) -> Self {
        Expr::BinOp(Box::new(left), op, Box::new(right))
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Not(Box::new(operand))
    }

    pub fn render(&self) -> String {
        match self {
            Expr::Name(n) => n.clone(),
            Expr::Int(v) if v.starts_with('-') => format!("({})", v),
            Expr::Int(v) => v.clone(),
            Expr::Str(s) => quote(s),
            Expr::Bool(true) => "True".to_string(),
            Expr::Bool(false) => "False".to_string(),
            Expr::NoneLit => "None".to_string(),
            Expr::List(items) => format!("[{}]", render_list(items)),
            Expr::EmptyDict => "{}".to_string(),
            Expr::Attribute(base, attr) => format!("{}.{}", base.render(), attr),
            Expr::Subscript(base, index) => format!("{}[{}]", base.render(), index.render()),
            Expr::Call(func, args) => format!("{}({})", func.render(), render_list(args)),
            Expr::Starred(inner) => format!("*{}", inner.render()),
            Expr::BinOp(l, op, r) => format!("({} {} {})", l.render(), op, r.render()),
            Expr::Not(inner) => format!("(not {})", inner.render()),
        }
    }
}

fn render_list(items: &[Expr]) -> String {
    items.iter().map(Expr::render).collect::<Vec<_>>().join(", ")
}

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

impl Param {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: Some(Expr::NoneLit),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub rest: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign(Expr, Expr),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Return(Expr),
    Nonlocal(Vec<String>),
    Import(String),
    FunctionDef(FunctionDef),
    Break,
    Pass,
}

impl Stmt {
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_stmt(self, 0, &mut out);
        out
    }
}

pub fn render_block(stmts: &[Stmt], depth: usize, out: &mut String) {
    for (index, stmt) in stmts.iter().enumerate() {
        if index > 0 && matches!(stmt, Stmt::FunctionDef(_)) {
            out.push('\n');
        }
        render_stmt(stmt, depth, out);
    }
}

fn render_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    let pad = INDENT.repeat(depth);
    match stmt {
        Stmt::Expr(e) => line(out, &pad, &e.render()),
        Stmt::Assign(target, value) => {
            line(out, &pad, &format!("{} = {}", target.render(), value.render()))
        }
        Stmt::If { test, body, orelse } => {
            line(out, &pad, &format!("if {}:", test.render()));
            render_suite(body, depth + 1, out);
            if !orelse.is_empty() {
                line(out, &pad, "else:");
                render_suite(orelse, depth + 1, out);
            }
        }
        Stmt::While { test, body } => {
            line(out, &pad, &format!("while {}:", test.render()));
            render_suite(body, depth + 1, out);
        }
        Stmt::For { target, iter, body } => {
            line(out, &pad, &format!("for {} in {}:", target, iter.render()));
            render_suite(body, depth + 1, out);
        }
        Stmt::Return(e) => line(out, &pad, &format!("return {}", e.render())),
        Stmt::Nonlocal(names) => line(out, &pad, &format!("nonlocal {}", names.join(", "))),
        Stmt::Import(module) => line(out, &pad, &format!("import {}", module)),
        Stmt::FunctionDef(def) => {
            let mut params = def
                .params
                .iter()
                .map(|p| match &p.default {
                    Some(d) => format!("{}={}", p.name, d.render()),
                    None => p.name.clone(),
                })
                .collect::<Vec<_>>();
            if let Some(rest) = &def.rest {
                params.push(format!("*{}", rest));
            }
            line(out, &pad, &format!("def {}({}):", def.name, params.join(", ")));
            render_suite(&def.body, depth + 1, out);
        }
        Stmt::Break => line(out, &pad, "break"),
        Stmt::Pass => line(out, &pad, "pass"),
    }
}

fn render_suite(stmts: &[Stmt], depth: usize, out: &mut String) {
    if stmts.is_empty() {
        render_stmt(&Stmt::Pass, depth, out);
    } else {
        render_block(stmts, depth, out);
    }
}

fn line(out: &mut String, pad: &str, text: &str) {
    out.push_str(pad);
    out.push_str(text);
    out.push('\n');
}

/// Plain names assigned directly in `body`, skipping nested function
/// bodies. `for` targets count as bindings too.
pub fn bound_names(body: &[Stmt]) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut assigned = BTreeSet::new();
    let mut loop_targets = BTreeSet::new();
    collect_bound(body, &mut assigned, &mut loop_targets);
    (assigned, loop_targets)
}

fn collect_bound(body: &[Stmt], assigned: &mut BTreeSet<String>, loops: &mut BTreeSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign(Expr::Name(n), _) => {
                assigned.insert(n.clone());
            }
            Stmt::If { body, orelse, .. } => {
                collect_bound(body, assigned, loops);
                collect_bound(orelse, assigned, loops);
            }
            Stmt::While { body, .. } => collect_bound(body, assigned, loops),
            Stmt::For { target, body, .. } => {
                loops.insert(target.clone());
                collect_bound(body, assigned, loops);
            }
            _ => {}
        }
    }
}

pub fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "False"
            | "None"
            | "True"
            | "and"
            | "as"
            | "assert"
            | "async"
            | "await"
            | "break"
            | "class"
            | "continue"
            | "def"
            | "del"
            | "elif"
            | "else"
            | "except"
            | "finally"
            | "for"
            | "from"
            | "global"
            | "if"
            | "import"
            | "in"
            | "is"
            | "lambda"
            | "nonlocal"
            | "not"
            | "or"
            | "pass"
            | "raise"
            | "return"
            | "try"
            | "while"
            | "with"
            | "yield"
    )
}
