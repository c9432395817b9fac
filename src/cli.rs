use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::runtime::DEFAULT_MAX_CALL_DEPTH;

#[derive(Parser, Debug)]
#[clap(version, about = "Interpreter for the GoKid scripting language")]
pub struct Args {
    /// Maximum number of nested function calls before evaluation fails
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    pub max_depth: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a source file
    Run {
        /// Path to the source file
        file: PathBuf,

        /// Run files without the .gokid extension without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Check a source file for syntax errors
    Check {
        /// Path to the source file to check
        file: PathBuf,
    },

    /// Print the token stream of a source file
    Tokens {
        /// Path to the source file to tokenize
        file: PathBuf,
    },

    /// Start an interactive REPL session
    Repl,
}
