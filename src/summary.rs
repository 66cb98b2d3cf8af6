use crate::{align::GeneFailure, open_for_write};
use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use std::{io::Write, path::{Path, PathBuf}};

/// Machine-readable account of a run, written next to the outputs
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started: String,
    pub finished: Option<String>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub genomes: usize,
    pub genes: usize,
    pub fractions: Vec<FractionSummary>,
    pub failed_genes: Vec<GeneFailure>,
}

#[derive(Debug, Default, Serialize)]
pub struct FractionSummary {
    pub fraction: String,
    pub threshold: f64,
    pub selected_genes: usize,
    pub concatenated_genes: usize,
    pub supermatrix: Option<PathBuf>,
    pub width: Option<usize>,
    pub tree: Option<String>,
    pub error: Option<String>,
}

impl RunSummary {
    // --------------------------------------------------
    pub fn new(input_dir: &Path, output_dir: &Path) -> Self {
        RunSummary {
            started: Local::now().to_rfc3339(),
            finished: None,
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            genomes: 0,
            genes: 0,
            fractions: vec![],
            failed_genes: vec![],
        }
    }

    // --------------------------------------------------
    /// Stamp the finish time and write as pretty JSON
    pub fn finish(&mut self, path: &Path) -> Result<()> {
        self.finished = Some(Local::now().to_rfc3339());
        let mut output = open_for_write(path)?;
        serde_json::to_writer_pretty(&mut output, &self)?;
        writeln!(output)?;
        output.flush()?;
        Ok(())
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{FractionSummary, RunSummary};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{fs, path::PathBuf};
    use tempfile::tempdir;

    #[test]
    fn test_finish() -> Result<()> {
        let outdir = tempdir()?;
        let path = outdir.path().join("run_summary.json");
        let mut summary = RunSummary::new(&PathBuf::from("in"), outdir.path());
        summary.genomes = 3;
        summary.fractions.push(FractionSummary {
            fraction: "0.5".to_string(),
            threshold: 0.5,
            selected_genes: 2,
            ..Default::default()
        });
        summary.finish(&path)?;

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(json["genomes"], 3);
        assert_eq!(json["fractions"][0]["fraction"], "0.5");
        assert_eq!(json["fractions"][0]["supermatrix"], serde_json::Value::Null);
        assert!(json["finished"].is_string());
        Ok(())
    }
}
