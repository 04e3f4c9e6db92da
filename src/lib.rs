pub mod assemble;
pub mod catalog;
pub mod codegen;
pub mod context;
pub mod custom_blocks;
pub mod document;
pub mod error;
pub mod python;
pub mod runtime;
pub mod tree;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(not(target_arch = "wasm32"))]
pub mod job;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

pub use assemble::{CompileOptions, DefinitionErrorPolicy};
pub use error::CompileError;

use document::Project;
#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};

pub fn compile(document: &str, entry: Option<&str>) -> error::Result<String> {
    let options = CompileOptions {
        entry: entry.map(str::to_string),
        ..CompileOptions::default()
    };
    compile_with_options(document, &options)
}

pub fn compile_with_options(document: &str, options: &CompileOptions) -> error::Result<String> {
    let tree = document::read_tree(document)?;
    let project = Project::from_tree(&tree);
    assemble::assemble(&tree, &project, options)
}

/// Script function `--run` calls when no entry is given.
#[cfg(not(target_arch = "wasm32"))]
const DEFAULT_RUN_ENTRY: &str = "main_0";

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> anyhow::Result<()> {
    use anyhow::Context;

    let mut stages = Stages::new(3 + usize::from(args.output.is_some()) + usize::from(args.run));

    stages.next("Resolving input path");
    let input = canonicalize_file(&args.input)?;

    stages.next("Reading project document");
    let document = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read '{}'.", pretty_path(&input)))?;
    let tree = document::read_tree(&document)?;
    let project = Project::from_tree(&tree);

    let options = CompileOptions {
        entry: entry_name(args, &project)
            .with_context(|| format!("No such entry script in '{}'.", pretty_path(&input)))?,
        on_definition_error: if args.skip_broken_definitions {
            DefinitionErrorPolicy::Skip
        } else {
            DefinitionErrorPolicy::FailFast
        },
    };

    stages.next("Generating Python");
    let program = assemble::assemble(&tree, &project, &options)?;

    if let Some(output) = &args.output {
        stages.next("Writing compiled module");
        std::fs::write(output, program.as_bytes())
            .with_context(|| format!("Failed to write '{}'.", pretty_path(output)))?;
    } else if !args.run {
        print!("{}", program);
    }

    if args.run {
        stages.next("Running job");
        let scratch;
        let dir = match &args.job_dir {
            Some(dir) => dir.clone(),
            None => {
                scratch = tempfile::tempdir().context("Failed to create a job directory.")?;
                scratch.path().to_path_buf()
            }
        };
        let mut job = job::Job::create(&dir)?;
        let state = job.start(&document, &options, &args.python)?;
        eprint!("{}", job.log()?);
        if state != job::JobState::Finished {
            anyhow::bail!(
                "Job ended in state '{}': {}",
                state,
                job.message().unwrap_or("no details")
            );
        }
        match job.result()? {
            Some(value) => println!("{}", value),
            None => println!("null"),
        }
    }

    Ok(())
}

/// `None` only when nothing asked for an entry call. `--run` without an
/// explicit entry runs the first script.
#[cfg(not(target_arch = "wasm32"))]
fn entry_name(args: &cli::Args, project: &Project) -> Option<Option<String>> {
    match (&args.entry, args.sprite_idx, args.block_idx) {
        (Some(name), _, _) => Some(Some(name.clone())),
        (None, Some(owner), Some(script)) => project.entry_for(owner, script).map(Some),
        _ if args.run => Some(Some(DEFAULT_RUN_ENTRY.to_string())),
        _ => Some(None),
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn canonicalize_file(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!("Input file not found: '{}'.", path.display()));
    }
    Ok(path.canonicalize()?)
}

#[cfg(not(target_arch = "wasm32"))]
fn pretty_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if let Some(stripped) = raw.strip_prefix(r"\\?\") {
        stripped.to_string()
    } else {
        raw
    }
}

#[cfg(not(target_arch = "wasm32"))]
const BAR_WIDTH: usize = 14;

#[cfg(not(target_arch = "wasm32"))]
struct Stages {
    total: usize,
    done: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl Stages {
    fn new(total: usize) -> Self {
        Self {
            total: total.max(1),
            done: 0,
        }
    }

    fn next(&mut self, label: &str) {
        self.done = (self.done + 1).min(self.total);
        eprintln!(
            "[{}/{}] {} {}...",
            self.done,
            self.total,
            progress_bar(self.done, self.total),
            label
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn progress_bar(done: usize, total: usize) -> String {
    let filled = done * BAR_WIDTH / total;
    format!("[{}{}]", "=".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_with_completed_stages() {
        assert_eq!(progress_bar(0, 7), "[--------------]");
        assert_eq!(progress_bar(3, 7), "[======--------]");
        assert_eq!(progress_bar(7, 7), "[==============]");
    }

    #[test]
    fn run_without_entry_calls_the_first_script() {
        use clap::Parser;

        let tree = document::read_tree(
            "<project><stage><scripts><script/><script/></scripts></stage></project>",
        )
        .unwrap();
        let project = Project::from_tree(&tree);
        let entry = |argv: &[&str]| entry_name(&cli::Args::parse_from(argv), &project);

        assert_eq!(entry(&["snappy", "p.xml", "--run"]), Some(Some("main_0".to_string())));
        assert_eq!(entry(&["snappy", "p.xml"]), Some(None));
        assert_eq!(
            entry(&["snappy", "p.xml", "--run", "--entry", "main_1"]),
            Some(Some("main_1".to_string()))
        );
        assert_eq!(
            entry(&["snappy", "p.xml", "--sprite-idx", "0", "--block-idx", "1"]),
            Some(Some("main_1".to_string()))
        );
        assert_eq!(entry(&["snappy", "p.xml", "--sprite-idx", "3", "--block-idx", "0"]), None);
    }

    #[test]
    fn compile_is_deterministic() {
        let doc = r#"<project><stage><scripts><script>
            <block s="doSetVar"><l>f</l><block s="reifyReporter"><autolambda><l>1</l></autolambda><list/></block></block>
        </script></scripts></stage></project>"#;
        assert_eq!(compile(doc, None).unwrap(), compile(doc, None).unwrap());
    }
}
