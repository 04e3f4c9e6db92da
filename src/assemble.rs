use crate::codegen::{literal, runtime_call, Generator, RUNTIME_MODULE};
use crate::context::GLOBAL_STORAGE;
use crate::custom_blocks::{BlockDefinition, CustomBlockRegistry};
use crate::document::Project;
use crate::error::{CompileError, Result};
use crate::python::{render_block, Expr, FunctionDef, Stmt};
use crate::tree::{NodeKind, TagTree};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DefinitionErrorPolicy {
    #[default]
    FailFast,
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub entry: Option<String>,
    pub on_definition_error: DefinitionErrorPolicy,
}

impl CompileOptions {
    pub fn with_entry(entry: impl Into<String>) -> Self {
        Self {
            entry: Some(entry.into()),
            ..Self::default()
        }
    }
}

pub fn assemble(tree: &TagTree, project: &Project, options: &CompileOptions) -> Result<String> {
    let mains = project.script_functions();
    if let Some(entry) = &options.entry {
        if !mains.iter().any(|(name, _)| name == entry) {
            return Err(CompileError::UnknownEntry {
                requested: entry.clone(),
                available: mains.iter().map(|(name, _)| name.clone()).collect(),
            });
        }
    }

    let registry = match options.on_definition_error {
        DefinitionErrorPolicy::FailFast => CustomBlockRegistry::build(tree, &project.definitions)?,
        DefinitionErrorPolicy::Skip => lenient_registry(tree, project),
    };
    let mut generator = Generator::new(tree, &registry);

    let mut functions: Vec<FunctionDef> = Vec::with_capacity(mains.len());
    for (name, script) in &mains {
        functions.push(generator.script_function(name, *script)?);
    }

    while let Some(id) = generator.next_used() {
        let definition = registry.resolve(&id)?;
        match generator.definition_function(definition) {
            Ok(function) => functions.push(function),
            Err(e) => match options.on_definition_error {
                DefinitionErrorPolicy::FailFast => return Err(e),
                DefinitionErrorPolicy::Skip => {
                    warn!("Skipping custom block '{}': {}", definition.canonical_id, e);
                }
            },
        }
    }

    let header = header(tree, project);
    let mut trailer = Vec::new();
    if let Some(entry) = &options.entry {
        debug!(entry = %entry, "appending entry call");
        trailer.push(Stmt::Expr(Expr::call(Expr::name(entry), Vec::new())));
    }
    trailer.push(Stmt::Expr(runtime_call(
        "dumpReport",
        vec![Expr::name("__file__")],
    )));

    info!(
        scripts = mains.len(),
        definitions = registry.len(),
        custom_blocks = generator.used_blocks().len(),
        emitted = functions.len(),
        "compiled project"
    );

    let mut sections = Vec::with_capacity(functions.len() + 2);
    sections.push(render(&header));
    for function in functions {
        sections.push(render(&[Stmt::FunctionDef(function)]));
    }
    sections.push(render(&trailer));
    Ok(sections.join("\n\n"))
}

fn lenient_registry(tree: &TagTree, project: &Project) -> CustomBlockRegistry {
    let mut registry = CustomBlockRegistry::new();
    for id in &project.definitions {
        match BlockDefinition::from_node(tree, *id) {
            Ok(definition) => registry.register(definition),
            Err(e) => warn!(
                "Skipping custom block '{}': {}",
                tree.attr(*id, "s").unwrap_or_default(),
                e
            ),
        }
    }
    registry
}

fn header(tree: &TagTree, project: &Project) -> Vec<Stmt> {
    let mut stmts = vec![
        Stmt::Import(RUNTIME_MODULE.to_string()),
        Stmt::Expr(runtime_call("cleanReport", Vec::new())),
        Stmt::Assign(Expr::name(GLOBAL_STORAGE), Expr::EmptyDict),
    ];
    for variable in &project.variables {
        let value = match variable.value {
            Some(node) if tree.kind(node) == &NodeKind::List => {
                let items = tree
                    .operands(node)
                    .into_iter()
                    .filter(|c| tree.kind(*c) == &NodeKind::Literal)
                    .map(|c| literal(&tree.text(c)))
                    .collect();
                Expr::List(items)
            }
            Some(node) => literal(&tree.text(node)),
            None => Expr::int(0),
        };
        stmts.push(Stmt::Assign(
            Expr::subscript(Expr::name(GLOBAL_STORAGE), Expr::str(&variable.name)),
            value,
        ));
    }
    stmts
}

fn render(stmts: &[Stmt]) -> String {
    let mut out = String::new();
    render_block(stmts, 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::read_tree;

    fn compile(xml: &str, options: &CompileOptions) -> Result<String> {
        let tree = read_tree(xml)?;
        let project = Project::from_tree(&tree);
        assemble(&tree, &project, options)
    }

    #[test]
    fn header_functions_and_footer_in_order() {
        let out = compile(
            r#"<project name="p"><stage name="Stage">
                 <variables><variable name="count"><l>3</l></variable></variables>
                 <scripts><script><block s="doSetVar"><l>count</l><l>4</l></block></script></scripts>
               </stage></project>"#,
            &CompileOptions::with_entry("main_0"),
        )
        .unwrap();
        assert_eq!(
            out,
            "import stdlib\nstdlib.cleanReport()\n_globals = {}\n_globals['count'] = 3\n\n\
             \ndef main_0():\n    _vars = {}\n    _globals['count'] = 4\n\n\
             \nmain_0()\nstdlib.dumpReport(__file__)\n"
        );
    }

    #[test]
    fn unknown_entry_lists_available_functions() {
        let err = compile(
            "<project><stage><scripts><script/></scripts></stage></project>",
            &CompileOptions::with_entry("main_7"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownEntry {
                requested: "main_7".to_string(),
                available: vec!["main_0".to_string()],
            }
        );
    }

    const BROKEN_DEFINITION: &str = r#"
        <project><stage><scripts>
          <script><custom-block s="bad"/></script>
        </scripts></stage>
        <blocks>
          <block-definition s="bad" type="command">
            <script><block s="gotoXY"><l>0</l><l>0</l></block></script>
          </block-definition>
        </blocks></project>"#;

    #[test]
    fn broken_definition_fails_fast_by_default() {
        let err = compile(BROKEN_DEFINITION, &CompileOptions::default()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedOperation {
                selector: "gotoXY".to_string()
            }
        );
    }

    #[test]
    fn broken_definition_can_be_skipped() {
        let options = CompileOptions {
            entry: None,
            on_definition_error: DefinitionErrorPolicy::Skip,
        };
        let out = compile(BROKEN_DEFINITION, &options).unwrap();
        assert!(out.contains("def main_0():\n    _vars = {}\n    bad()\n"));
        assert!(!out.contains("def bad("));
    }

    #[test]
    fn unreachable_definitions_are_not_emitted() {
        let out = compile(
            r#"<project><stage><scripts><script/></scripts></stage>
               <blocks><block-definition s="unused" type="command"/></blocks></project>"#,
            &CompileOptions::default(),
        )
        .unwrap();
        assert!(!out.contains("unused"));
        assert!(out.ends_with("stdlib.dumpReport(__file__)\n"));
    }
}
