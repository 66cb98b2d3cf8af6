use crate::{collect::GeneMembership, error::PipelineError, open_for_write};
use anyhow::Result;
use log::{info, warn};
use std::{fmt, io::Write, path::Path, str::FromStr};

/// Minimum share of genomes that must carry a gene for it to be included.
///
/// The label is kept exactly as given on the command line since it names
/// the per-fraction output files.
#[derive(Debug, Clone, PartialEq)]
pub struct Fraction {
    label: String,
    value: f64,
}

impl Fraction {
    // --------------------------------------------------
    pub fn label(&self) -> &str {
        &self.label
    }

    // --------------------------------------------------
    pub fn value(&self) -> f64 {
        self.value
    }

    // --------------------------------------------------
    /// Whether a gene carried by `carriers` of `genome_count` genomes
    /// passes this threshold
    pub fn admits(&self, carriers: usize, genome_count: usize) -> bool {
        carriers as f64 >= self.value * genome_count as f64
    }
}

impl FromStr for Fraction {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        match label.parse::<f64>() {
            Ok(value) if (0.0..=1.0).contains(&value) => Ok(Fraction {
                label: label.to_string(),
                value,
            }),
            _ => Err(PipelineError::InvalidFraction(label.to_string())),
        }
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// The genes passing one fraction, in gene discovery order
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub fraction: Fraction,
    pub genes: Vec<String>,
}

// --------------------------------------------------
/// Parse a comma-separated list like "1.0,0.75,0.5". Repeated labels
/// are dropped.
pub fn parse_fractions(list: &str) -> Result<Vec<Fraction>, PipelineError> {
    let mut fractions: Vec<Fraction> = vec![];
    for part in list.split(',') {
        let fraction: Fraction = part.parse()?;
        if fractions.iter().any(|f| f.label == fraction.label) {
            warn!(r#"Fraction "{fraction}" given more than once"#);
            continue;
        }
        fractions.push(fraction);
    }

    if fractions.is_empty() {
        return Err(PipelineError::EmptyFractionList);
    }

    Ok(fractions)
}

// --------------------------------------------------
/// For each fraction, the genes carried by at least `fraction * genome_count`
/// genomes.
pub fn select_fractions(
    membership: &GeneMembership,
    genome_count: usize,
    fractions: &[Fraction],
) -> Vec<Selection> {
    fractions
        .iter()
        .map(|fraction| {
            let genes: Vec<String> = membership
                .iter()
                .filter(|(_, genomes)| fraction.admits(genomes.len(), genome_count))
                .map(|(gene, _)| gene.clone())
                .collect();
            info!("Fraction {fraction}: {} genes", genes.len());
            Selection {
                fraction: fraction.clone(),
                genes,
            }
        })
        .collect()
}

// --------------------------------------------------
/// The selection with the lowest threshold, compared numerically. Its genes
/// are a superset of every other selection's.
pub fn most_permissive(selections: &[Selection]) -> Option<&Selection> {
    selections
        .iter()
        .min_by(|a, b| a.fraction.value.total_cmp(&b.fraction.value))
}

// --------------------------------------------------
pub fn write_manifest(path: &Path, genes: &[String]) -> Result<()> {
    let mut output = open_for_write(path)?;
    writeln!(output, "Number of genes considered: {}", genes.len())?;
    writeln!(output, "Analyzed genes:")?;
    for gene in genes {
        writeln!(output, "{gene}")?;
    }
    output.flush()?;
    Ok(())
}
