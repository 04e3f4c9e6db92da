use crate::catalog::{self, BlockKind};
use crate::error::{CompileError, Result};
use std::collections::HashMap;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Tag(NodeId),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Tag,
    Literal,
    Option,
    List,
    Input,
    Script,
    AutoLambda,
    Block(BlockKind),
    CustomBlock { selector: String },
    BlockDefinition,
}

impl NodeKind {
    fn accepts_text(&self) -> bool {
        matches!(self, NodeKind::Literal | NodeKind::Option)
    }

    /// Name the closing element must carry. Specialized blocks still close
    /// as a plain `block`.
    fn closing_name<'a>(&self, element_name: &'a str) -> &'a str {
        match self {
            NodeKind::Block(_) => "block",
            NodeKind::CustomBlock { .. } => "custom-block",
            NodeKind::BlockDefinition => "block-definition",
            _ => element_name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<Child>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Default)]
pub struct TagTree {
    nodes: Vec<Tag>,
    roots: Vec<NodeId>,
}

impl TagTree {
    pub fn get(&self, id: NodeId) -> &Tag {
        &self.nodes[id]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.nodes[id].attributes.get(key).map(String::as_str)
    }

    pub fn tag_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id].children.iter().filter_map(|c| match c {
            Child::Tag(child) => Some(*child),
            Child::Text(_) => None,
        })
    }

    pub fn first_child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.tag_children(id).find(|c| self.nodes[*c].name == name)
    }

    /// Concatenated text content of a node, or of the first `option` it
    /// wraps (`<l><option>last</option></l>`).
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in &self.nodes[id].children {
            match child {
                Child::Text(t) => out.push_str(t),
                Child::Tag(c) if self.nodes[*c].kind == NodeKind::Option && out.is_empty() => {
                    out.push_str(&self.text(*c));
                }
                Child::Tag(_) => {}
            }
        }
        out
    }

    pub fn operands(&self, id: NodeId) -> Vec<NodeId> {
        self.tag_children(id)
            .filter(|c| {
                matches!(
                    self.nodes[*c].kind,
                    NodeKind::Literal
                        | NodeKind::List
                        | NodeKind::Script
                        | NodeKind::AutoLambda
                        | NodeKind::Block(_)
                        | NodeKind::CustomBlock { .. }
                )
            })
            .collect()
    }
}

/// Builds a [`TagTree`] from start/text/end events. Keeps the ids of the
/// currently open elements, so appending never re-walks from the root.
#[derive(Debug, Default)]
pub struct TagTreeBuilder {
    tree: TagTree,
    stack: Vec<NodeId>,
}

impl TagTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, name: &str, attributes: HashMap<String, String>) -> Result<()> {
        let kind = match name {
            "block" => NodeKind::Block(catalog::resolve(&attributes)?),
            "custom-block" => NodeKind::CustomBlock {
                selector: attributes.get("s").cloned().ok_or_else(|| {
                    CompileError::structure("'custom-block' is missing its 's' attribute")
                })?,
            },
            "block-definition" => NodeKind::BlockDefinition,
            "l" => NodeKind::Literal,
            "option" => NodeKind::Option,
            "list" => NodeKind::List,
            "input" => NodeKind::Input,
            "script" => NodeKind::Script,
            "autolambda" => NodeKind::AutoLambda,
            _ => NodeKind::Tag,
        };
        let id = self.tree.nodes.len();
        self.tree.nodes.push(Tag {
            name: name.to_string(),
            attributes,
            children: Vec::new(),
            kind,
        });
        match self.stack.last() {
            Some(parent) => self.tree.nodes[*parent].children.push(Child::Tag(id)),
            None => self.tree.roots.push(id),
        }
        self.stack.push(id);
        Ok(())
    }

    pub fn text(&mut self, data: &str) {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return;
        }
        if let Some(top) = self.stack.last() {
            let node = &mut self.tree.nodes[*top];
            if node.kind.accepts_text() {
                node.children.push(Child::Text(trimmed.to_string()));
            }
        }
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        let id = self
            .stack
            .pop()
            .ok_or_else(|| CompileError::structure(format!("unexpected closing tag '{}'", name)))?;
        let node = &self.tree.nodes[id];
        let expected = node.kind.closing_name(&node.name);
        if expected != name {
            return Err(CompileError::structure(format!(
                "closing tag '{}' does not match open '{}'",
                name, expected
            )));
        }
        Ok(())
    }

    pub fn finish(self) -> Result<TagTree> {
        if let Some(open) = self.stack.last() {
            return Err(CompileError::structure(format!(
                "element '{}' was never closed",
                self.tree.nodes[*open].name
            )));
        }
        Ok(self.tree)
    }
}
