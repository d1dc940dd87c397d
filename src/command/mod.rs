mod paths;
mod logging;
mod mapping;
mod reference;
mod variants;
mod pipeline;

use std::{
    fmt::Display,
    path::Path,
    process::ExitCode,
    str::FromStr,
};
use colored::{Colorize, ColoredString};
use crate::ext;

pub const PROGRAM: &'static str = env!("CARGO_PKG_NAME");

/// Print tool version and authors.
fn print_version() {
    println!("{} {}", PROGRAM.underline(), format!("v{}", env!("CARGO_PKG_VERSION")).green());
    let authors: Vec<_> = env!("CARGO_PKG_AUTHORS").split(':').collect();
    let n = authors.len();
    if n == 0 {
        return;
    }
    print!("Created by ");
    for (i, author) in authors.iter().enumerate() {
        if i == 0 {
            print!("{}", author.bright_blue());
        } else if i < n - 1 {
            print!(", {}", author.bright_blue());
        } else {
            print!(" and {}", author.bright_blue());
        }
    }
    println!();
}

/// Formats default value for the help message.
fn fmt_def(val: impl Display) -> ColoredString {
    val.to_string().cyan()
}

/// Formats default floating point value for the help message.
fn fmt_def_f64(val: f64) -> ColoredString {
    format!("{}", val).cyan()
}

/// Placeholder for flags in the help message.
fn flag() -> ColoredString {
    "    ".normal()
}

/// What to do with alignments, left from the previous runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rerun {
    /// Reuse complete alignments, redo incomplete ones.
    None,
    /// Remove all existing alignments and map everything again.
    All,
}

impl Rerun {
    /// Returns true if the existing output file should be discarded.
    fn discard_existing(self, path: &Path) -> bool {
        if self == Rerun::All && path.exists() {
            log::warn!("    Discarding existing {}", ext::fmt::path(path));
            true
        } else {
            false
        }
    }
}

impl FromStr for Rerun {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase() as &str {
            "none" | "no" => Ok(Self::None),
            "all" | "full" => Ok(Self::All),
            _ => Err(format!("Unknown rerun mode {:?} (possible values: none, all)", s)),
        }
    }
}

impl Display for Rerun {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::All => "all",
        })
    }
}

/// Runs the pipeline. Errors that appear before the logger is installed are printed to stderr,
/// all other errors are logged both to the console and the log file.
pub fn run(argv: &[String]) -> ExitCode {
    match pipeline::run(argv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if logging::is_active() {
                log::error!("{}", e.display());
                log::error!("Pipeline stopped. Rerun to continue from the completed alignments.");
                logging::flush();
            } else {
                eprintln!("{}", e.display());
            }
            ExitCode::FAILURE
        }
    }
}
