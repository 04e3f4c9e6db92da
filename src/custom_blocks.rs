use crate::error::{CompileError, Result};
use crate::python::is_keyword;
use crate::tree::{NodeId, NodeKind, TagTree};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Command,
    Reporter,
    Predicate,
}

impl BlockType {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("reporter") => BlockType::Reporter,
            Some("predicate") => BlockType::Predicate,
            _ => BlockType::Command,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    CommandSequence,
    Upvar,
    List,
    Number,
    Text,
    Boolean,
    Ring,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamType {
    pub code: String,
}

impl ParamType {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    pub fn kind(&self) -> ParamKind {
        match self.code.as_str() {
            "%cs" | "%ca" => ParamKind::CommandSequence,
            "%upvar" => ParamKind::Upvar,
            "%l" => ParamKind::List,
            "%n" => ParamKind::Number,
            "%s" | "%txt" | "%mlt" | "%code" => ParamKind::Text,
            "%b" | "%boolUE" => ParamKind::Boolean,
            "%repRing" | "%cmdRing" | "%predRing" => ParamKind::Ring,
            _ => ParamKind::Any,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockDefinition {
    pub node: NodeId,
    pub label: String,
    pub block_type: BlockType,
    pub category: String,
    pub param_types: Vec<ParamType>,
    pub param_labels: Vec<String>,
    pub param_idents: Vec<String>,
    pub canonical_id: String,
    pub function_name: String,
    pub script: Option<NodeId>,
}

impl BlockDefinition {
    pub fn from_node(tree: &TagTree, id: NodeId) -> Result<Self> {
        if tree.kind(id) != &NodeKind::BlockDefinition {
            return Err(CompileError::structure(format!(
                "expected 'block-definition', found '{}'",
                tree.get(id).name
            )));
        }
        let label = tree
            .attr(id, "s")
            .ok_or_else(|| CompileError::structure("'block-definition' is missing its 's' label"))?
            .to_string();
        let param_types = match tree.first_child_named(id, "inputs") {
            Some(inputs) => tree
                .tag_children(inputs)
                .filter(|c| tree.kind(*c) == &NodeKind::Input)
                .map(|c| ParamType::new(tree.attr(c, "type").unwrap_or("%s")))
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };
        let tokens = label_tokens(&label);
        let param_labels = tokens
            .iter()
            .filter(|t| t.starts_with('%'))
            .map(|t| param_label(t))
            .collect::<Vec<_>>();
        if param_labels.len() != param_types.len() {
            return Err(CompileError::argument_shape(format!(
                "custom block '{}' has {} placeholder(s) but declares {} input(s)",
                label,
                param_labels.len(),
                param_types.len()
            )));
        }
        let canonical_id = canonical_id(&tokens, &param_types);
        let param_idents = param_labels.iter().map(|p| identifier(p)).collect();
        Ok(Self {
            node: id,
            block_type: BlockType::parse(tree.attr(id, "type")),
            category: tree.attr(id, "category").unwrap_or("other").to_string(),
            function_name: function_name(&label),
            script: tree.first_child_named(id, "script"),
            label,
            param_types,
            param_labels,
            param_idents,
            canonical_id,
        })
    }

    pub fn param_ident(&self, name: &str) -> Option<&str> {
        self.param_labels
            .iter()
            .position(|p| p == name)
            .map(|index| self.param_idents[index].as_str())
    }
}

/// Splits a label on whitespace. A quoted placeholder (`%'my var'`) stays
/// one token.
pub fn label_tokens(label: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut open: Option<String> = None;
    for word in label.split_whitespace() {
        if let Some(mut acc) = open.take() {
            acc.push(' ');
            acc.push_str(word);
            if word.ends_with('\'') {
                out.push(acc);
            } else {
                open = Some(acc);
            }
            continue;
        }
        if word.starts_with("%'") && (word.len() == 2 || !word.ends_with('\'')) {
            open = Some(word.to_string());
        } else {
            out.push(word.to_string());
        }
    }
    if let Some(acc) = open {
        out.push(acc);
    }
    out
}

/// The Nth placeholder binds to the Nth declared type.
fn canonical_id(tokens: &[String], param_types: &[ParamType]) -> String {
    let mut types = param_types.iter().rev().collect::<Vec<_>>();
    tokens
        .iter()
        .map(|t| {
            if t.starts_with('%') {
                types.pop().map(|p| p.code.clone()).unwrap_or_else(|| t.clone())
            } else {
                t.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn param_label(token: &str) -> String {
    token
        .trim_start_matches('%')
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string()
}

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("static pattern"))
}

fn generated_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(main|ring|custom_block|_args)_\d+$").expect("static pattern")
    })
}

/// Names the emitted module already binds at top level or inside every
/// function.
const MODULE_NAMES: &[&str] = &["stdlib", "_globals", "_vars", "range", "_"];

fn is_reserved(name: &str) -> bool {
    MODULE_NAMES.contains(&name) || generated_name().is_match(name)
}

pub fn function_name(label: &str) -> String {
    safe_identifier(non_alphanumeric().replace_all(label, "_").into_owned())
}

pub fn identifier(name: &str) -> String {
    let cleaned = non_alphanumeric().replace_all(name, "_").into_owned();
    let mut ident = safe_identifier(cleaned);
    if is_reserved(&ident) {
        ident.push('_');
    }
    ident
}

fn safe_identifier(mut name: String) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) || is_keyword(&name) {
        name.insert(0, '_');
    }
    name
}

#[derive(Debug, Clone, Default)]
pub struct CustomBlockRegistry {
    definitions: HashMap<String, BlockDefinition>,
    function_names: HashSet<String>,
}

impl CustomBlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(tree: &TagTree, definitions: &[NodeId]) -> Result<Self> {
        let mut registry = Self::new();
        for id in definitions {
            registry.register(BlockDefinition::from_node(tree, *id)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, mut definition: BlockDefinition) {
        if self.definitions.contains_key(&definition.canonical_id) {
            warn!(
                "Duplicate custom block '{}'; keeping the first definition.",
                definition.canonical_id
            );
            return;
        }
        if is_reserved(&definition.function_name) {
            definition.function_name.push('_');
        }
        let base = definition.function_name.clone();
        let mut suffix = 2usize;
        while !self.function_names.insert(definition.function_name.clone()) {
            definition.function_name = format!("{}{}", base, suffix);
            suffix += 1;
        }
        debug!(
            id = %definition.canonical_id,
            function = %definition.function_name,
            "registered custom block"
        );
        self.definitions
            .insert(definition.canonical_id.clone(), definition);
    }

    pub fn resolve(&self, selector: &str) -> Result<&BlockDefinition> {
        self.definitions
            .get(selector)
            .ok_or_else(|| CompileError::UnresolvedCustomBlock {
                requested: selector.to_string(),
                known: self.known_ids(),
            })
    }

    pub fn by_node(&self, node: NodeId) -> Option<&BlockDefinition> {
        self.definitions.values().find(|d| d.node == node)
    }

    pub fn known_ids(&self) -> Vec<String> {
        let mut ids = self.definitions.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
