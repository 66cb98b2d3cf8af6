use std::path::PathBuf;
use thiserror::Error;

/// Failures the pipeline distinguishes between.
///
/// Configuration problems (including unusable genome names) stop the run before any work is done, tool
/// failures are logged and scoped to one gene or fraction, and format
/// violations abort the supermatrix of the fraction they were found in.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(r#"Input directory "{}" does not exist or is not a directory"#, .0.display())]
    MissingInput(PathBuf),

    #[error(r#"Genome name "{0}" contains whitespace"#)]
    InvalidGenomeId(String),

    #[error(r#"Invalid fraction "{0}": expected a number between 0 and 1"#)]
    InvalidFraction(String),

    #[error("No fractions given")]
    EmptyFractionList,

    #[error(r#"Invalid command template "{template}": {reason}"#)]
    InvalidTemplate { template: String, reason: String },

    #[error(r#"Cannot find program "{0}""#)]
    ProgramNotFound(String),

    #[error(r#"Bad configuration "{}": {reason}"#, .path.display())]
    Config { path: PathBuf, reason: String },

    #[error(r#"{tool} failed on "{target}" ({status}): {message}"#)]
    ToolFailed {
        tool: String,
        target: String,
        status: String,
        message: String,
    },

    #[error(
        r#"Gene "{gene}": row for "{genome}" has length {found}, expected {expected}"#
    )]
    UnequalRowLengths {
        gene: String,
        genome: String,
        expected: usize,
        found: usize,
    },

    #[error(r#"Gene "{0}" has no aligned rows to take a padding length from"#)]
    NoReferenceRow(String),

    #[error(r#"Alignment "{}" contains no sequences"#, .0.display())]
    EmptyAlignment(PathBuf),
}
