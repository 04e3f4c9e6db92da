use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "snappy",
    about = "Compile Snap! project XML to Python 3 and optionally run it."
)]
pub struct Args {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(value_name = "OUTPUT", help = "Write the Python module here instead of stdout.")]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        conflicts_with_all = ["sprite_idx", "block_idx"],
        help = "Script function to call at the end of the module (main_0, main_1, ...)."
    )]
    pub entry: Option<String>,

    #[arg(long, requires = "block_idx", help = "Stage/sprite index of the entry script.")]
    pub sprite_idx: Option<usize>,

    #[arg(long, requires = "sprite_idx", help = "Script index of the entry script within its sprite.")]
    pub block_idx: Option<usize>,

    #[arg(
        long,
        help = "Run the compiled module and print the last reported value. Calls main_0 unless an entry is given."
    )]
    pub run: bool,

    #[arg(long, requires = "run", help = "Directory for job files (defaults to a temporary one).")]
    pub job_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "SNAPPY_PYTHON",
        default_value = "python3",
        help = "Python interpreter used by --run."
    )]
    pub python: String,

    #[arg(
        long,
        help = "Leave out custom blocks that fail to compile instead of aborting."
    )]
    pub skip_broken_definitions: bool,

    #[arg(long, help = "Enable debug logging.")]
    pub verbose: bool,
}
