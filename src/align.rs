use crate::{command::CommandTemplate, error::PipelineError, OutputPaths};
use anyhow::Result;
use indexmap::IndexMap;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A gene whose alignment or trimming did not produce an alignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneFailure {
    pub gene: String,
    pub tool: String,
    pub command: String,
    pub exit_code: Option<i32>,
    pub message: String,
}

/// Result of the alignment phase
#[derive(Debug, Default)]
pub struct AlignmentReport {
    /// Trimmed alignment per gene, in the order the genes were given
    pub trimmed: IndexMap<String, PathBuf>,
    pub failures: Vec<GeneFailure>,
}

// --------------------------------------------------
/// Align then trim every gene, `threads` genes at a time. A failing gene is
/// logged and reported; it never stops the others.
pub fn align_genes(
    genes: &[String],
    paths: &OutputPaths,
    aligner: &CommandTemplate,
    trimmer: &CommandTemplate,
    threads: usize,
) -> Result<AlignmentReport> {
    info!("Aligning {} genes on {threads} thread(s)", genes.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()?;

    let results: Vec<(String, Result<PathBuf, GeneFailure>)> = pool.install(|| {
        genes
            .par_iter()
            .map(|gene| (gene.clone(), align_gene(gene, paths, aligner, trimmer)))
            .collect()
    });

    let mut report = AlignmentReport::default();
    for (gene, res) in results {
        match res {
            Ok(path) => {
                report.trimmed.insert(gene, path);
            }
            Err(failure) => report.failures.push(failure),
        }
    }

    info!(
        "Aligned {} genes, {} failed",
        report.trimmed.len(),
        report.failures.len()
    );
    Ok(report)
}

// --------------------------------------------------
fn align_gene(
    gene: &str,
    paths: &OutputPaths,
    aligner: &CommandTemplate,
    trimmer: &CommandTemplate,
) -> Result<PathBuf, GeneFailure> {
    let aligned = paths.aligned(gene);
    let trimmed = paths.trimmed(gene);

    info!("Aligning {gene}");
    run_step(gene, aligner, &paths.gene(gene), &aligned)?;

    info!("Trimming {gene}");
    run_step(gene, trimmer, &aligned, &trimmed)?;

    Ok(trimmed)
}

// --------------------------------------------------
fn run_step(
    gene: &str,
    template: &CommandTemplate,
    input: &Path,
    output: &Path,
) -> Result<(), GeneFailure> {
    let cmd = template.render(input, output);
    let failure = |exit_code: Option<i32>, status: String, message: String| {
        let err = PipelineError::ToolFailed {
            tool: template.tool().to_string(),
            target: gene.to_string(),
            status,
            message: message.clone(),
        };
        warn!(r#"{err} [{cmd}]"#);
        GeneFailure {
            gene: gene.to_string(),
            tool: template.tool().to_string(),
            command: cmd.to_string(),
            exit_code,
            message,
        }
    };

    match cmd.run() {
        Err(e) => Err(failure(None, "not started".to_string(), e.to_string())),
        Ok(outcome) if !outcome.success => Err(failure(
            outcome.exit_code,
            outcome.status(),
            outcome.stderr.clone(),
        )),
        Ok(outcome) if !output.is_file() => Err(failure(
            outcome.exit_code,
            outcome.status(),
            format!("no output file {}", output.display()),
        )),
        Ok(_) => Ok(()),
    }
}
