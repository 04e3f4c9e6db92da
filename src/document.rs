use crate::error::{CompileError, Result};
use crate::tree::{NodeId, NodeKind, TagTree, TagTreeBuilder};
use std::io::Cursor;
use tracing::debug;
use xmltree::{Element, XMLNode};

pub fn read_tree(xml: &str) -> Result<TagTree> {
    let root = Element::parse(Cursor::new(xml.as_bytes()))
        .map_err(|e| CompileError::Xml(e.to_string()))?;
    let mut builder = TagTreeBuilder::new();
    replay(&root, &mut builder)?;
    let tree = builder.finish()?;
    debug!(nodes = tree.len(), root = %root.name, "read project document");
    Ok(tree)
}

fn replay(element: &Element, builder: &mut TagTreeBuilder) -> Result<()> {
    let attributes = element
        .attributes
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    builder.start(&element.name, attributes)?;
    for child in &element.children {
        match child {
            XMLNode::Element(e) => replay(e, builder)?,
            XMLNode::Text(t) | XMLNode::CData(t) => builder.text(t),
            _ => {}
        }
    }
    builder.end(&element.name)
}

#[derive(Debug, Clone)]
pub struct ScriptOwner {
    pub name: String,
    pub scripts: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: String,
    pub value: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct Project {
    pub name: Option<String>,
    pub app: Option<String>,
    pub version: Option<String>,
    pub owners: Vec<ScriptOwner>,
    pub definitions: Vec<NodeId>,
    pub variables: Vec<VariableDecl>,
}

impl Project {
    pub fn from_tree(tree: &TagTree) -> Self {
        let mut project = Project::default();
        for root in tree.roots() {
            if tree.get(*root).name == "project" {
                project.name = tree.attr(*root, "name").map(str::to_string);
                project.app = tree.attr(*root, "app").map(str::to_string);
                project.version = tree.attr(*root, "version").map(str::to_string);
            }
            project.visit(tree, *root, None);
        }
        project
    }

    fn visit(&mut self, tree: &TagTree, id: NodeId, owner: Option<usize>) {
        let tag = tree.get(id);
        match (&tag.kind, tag.name.as_str()) {
            (NodeKind::BlockDefinition, _) => {
                self.definitions.push(id);
                return;
            }
            (NodeKind::Script, _) => {
                let owner = self.owner_or_implicit(owner);
                self.owners[owner].scripts.push(id);
                return;
            }
            (_, "stage") | (_, "sprite") => {
                self.owners.push(ScriptOwner {
                    name: tree.attr(id, "name").unwrap_or_default().to_string(),
                    scripts: Vec::new(),
                });
                let index = self.owners.len() - 1;
                for child in tree.tag_children(id) {
                    self.visit(tree, child, Some(index));
                }
                return;
            }
            (_, "variables") => {
                for var in tree.tag_children(id) {
                    if let Some(name) = tree.attr(var, "name") {
                        let value = tree.tag_children(var).find(|c| {
                            matches!(tree.kind(*c), NodeKind::Literal | NodeKind::List)
                        });
                        self.variables.push(VariableDecl {
                            name: name.to_string(),
                            value,
                        });
                    }
                }
                return;
            }
            // Loose blocks outside a script are never executed.
            (NodeKind::Block(_), _) | (NodeKind::CustomBlock { .. }, _) => return,
            _ => {}
        }
        for child in tree.tag_children(id) {
            self.visit(tree, child, owner);
        }
    }

    fn owner_or_implicit(&mut self, owner: Option<usize>) -> usize {
        match owner {
            Some(index) => index,
            None => {
                if self.owners.is_empty() {
                    self.owners.push(ScriptOwner {
                        name: String::new(),
                        scripts: Vec::new(),
                    });
                }
                0
            }
        }
    }

    pub fn script_functions(&self) -> Vec<(String, NodeId)> {
        self.owners
            .iter()
            .flat_map(|o| o.scripts.iter())
            .enumerate()
            .map(|(index, id)| (format!("main_{}", index), *id))
            .collect()
    }

    /// Function name of the `script`-th script of the `owner`-th stage or
    /// sprite.
    pub fn entry_for(&self, owner: usize, script: usize) -> Option<String> {
        let owner_scripts = self.owners.get(owner)?;
        if script >= owner_scripts.scripts.len() {
            return None;
        }
        let offset = self.owners[..owner]
            .iter()
            .map(|o| o.scripts.len())
            .sum::<usize>();
        Some(format!("main_{}", offset + script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
        <project name="demo" app="Snap! 4.0" version="1">
          <stage name="Stage">
            <variables>
              <variable name="count"><l>3</l></variable>
              <variable name="label"/>
            </variables>
            <scripts>
              <script x="1" y="2"><block s="receiveGo"/></script>
            </scripts>
            <sprites>
              <sprite name="Alice">
                <scripts>
                  <script><block var="a"/></script>
                  <comment>loose note</comment>
                  <script/>
                </scripts>
                <blocks>
                  <block-definition s="helper" type="command">
                    <scripts><script/></scripts>
                    <script/>
                  </block-definition>
                </blocks>
              </sprite>
            </sprites>
          </stage>
          <blocks>
            <block-definition s="global" type="reporter"/>
          </blocks>
        </project>"#;

    #[test]
    fn discovers_owners_scripts_and_definitions() {
        let tree = read_tree(PROJECT).unwrap();
        let project = Project::from_tree(&tree);
        assert_eq!(project.name.as_deref(), Some("demo"));
        assert_eq!(project.app.as_deref(), Some("Snap! 4.0"));
        assert_eq!(project.owners.len(), 2);
        assert_eq!(project.owners[0].name, "Stage");
        assert_eq!(project.owners[0].scripts.len(), 1);
        assert_eq!(project.owners[1].name, "Alice");
        assert_eq!(project.owners[1].scripts.len(), 2);
        // scripts inside a definition's editor are not entry points
        assert_eq!(project.definitions.len(), 2);
        let names = project
            .variables
            .iter()
            .map(|v| v.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["count", "label"]);
        assert!(project.variables[0].value.is_some());
        assert!(project.variables[1].value.is_none());
    }

    #[test]
    fn entry_names_follow_document_order() {
        let tree = read_tree(PROJECT).unwrap();
        let project = Project::from_tree(&tree);
        let names = project
            .script_functions()
            .into_iter()
            .map(|(n, _)| n)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["main_0", "main_1", "main_2"]);
        assert_eq!(project.entry_for(1, 1).as_deref(), Some("main_2"));
        assert_eq!(project.entry_for(1, 2), None);
        assert_eq!(project.entry_for(5, 0), None);
    }

    #[test]
    fn bare_script_gets_implicit_owner() {
        let tree = read_tree("<script><block var=\"x\"/></script>").unwrap();
        let project = Project::from_tree(&tree);
        assert_eq!(project.owners.len(), 1);
        assert_eq!(project.owners[0].scripts, vec![0]);
    }

    #[test]
    fn malformed_xml_is_reported() {
        let err = read_tree("<project><stage></project>").unwrap_err();
        assert!(matches!(err, CompileError::Xml(_)));
    }
}
