pub mod align;
pub mod collect;
pub mod command;
pub mod concat;
pub mod config;
pub mod error;
pub mod fraction;
pub mod summary;

use align::{align_genes, AlignmentReport};
use anyhow::{anyhow, bail, Result};
use clap::{builder::PossibleValue, Parser, ValueEnum};
use collect::{collect, write_membership};
use command::CommandTemplate;
use concat::{concatenate, TrimmedAlignment};
use config::Config;
use error::PipelineError;
use fraction::{most_permissive, parse_fractions, select_fractions, write_manifest, Fraction, Selection};
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, error, info, warn};
use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};
use summary::{FractionSummary, RunSummary};

pub const DEFAULT_SUFFIX: &str = ".faa";
pub const DEFAULT_MARKER: &str = "single_copy_busco_sequences";

/// Concatenate single-copy orthologs into per-fraction supermatrices
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Directory with one subdirectory of ortholog calls per genome
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Output directory
    #[arg(value_name = "OUTPUT_DIR")]
    pub outdir: PathBuf,

    /// Comma-separated minimum fractions of genomes sharing a gene, e.g. "1,0.9,0.75"
    #[arg(value_name = "FRACTIONS")]
    pub fractions: String,

    /// Alignment command with input and output placeholders, e.g. "mafft --auto {} > {}"
    #[arg(value_name = "ALIGN_CMD")]
    pub align_cmd: String,

    /// Trimming command, e.g. "trimal -in {} -out {} -automated1"
    #[arg(value_name = "TRIM_CMD")]
    pub trim_cmd: String,

    /// Tree command with input and output prefix, e.g. "iqtree2 -s {} --prefix {}"
    #[arg(value_name = "TREE_CMD")]
    pub tree_cmd: String,

    /// TOML config file
    #[arg(short, long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Ortholog file suffix [default: .faa]
    #[arg(long, value_name = "SUFFIX")]
    pub suffix: Option<String>,

    /// Name of the directory holding single-copy ortholog files
    /// [default: single_copy_busco_sequences]
    #[arg(long, value_name = "MARKER")]
    pub marker: Option<String>,

    /// Number of genes to align at once [default: number of CPUs]
    #[arg(short, long, value_name = "THREADS", value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// Write supermatrices without running the tree command
    #[arg(long)]
    pub skip_tree: bool,

    /// Do not check that the command programs exist before starting
    #[arg(long)]
    pub no_check_programs: bool,

    /// Log level
    #[arg(short, long)]
    pub log: Option<LogLevel>,

    /// Log file, default STDERR
    #[arg(long, value_name = "LOGFILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Info,
    Debug,
}

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[LogLevel::Info, LogLevel::Debug]
    }

    fn to_possible_value<'a>(&self) -> Option<PossibleValue> {
        Some(match self {
            LogLevel::Info => PossibleValue::new("info"),
            LogLevel::Debug => PossibleValue::new("debug"),
        })
    }
}

// --------------------------------------------------
fn parse_threads(val: &str) -> Result<usize, String> {
    match val.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!(r#""{val}" is not a positive integer"#)),
    }
}

/// Arguments merged with the config file and defaults
#[derive(Debug)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub outdir: PathBuf,
    pub fractions: Vec<Fraction>,
    pub aligner: CommandTemplate,
    pub trimmer: CommandTemplate,
    pub tree_builder: CommandTemplate,
    pub suffix: String,
    pub marker: String,
    pub threads: usize,
    pub skip_tree: bool,
    pub check_programs: bool,
}

impl Settings {
    // --------------------------------------------------
    pub fn new(args: &Args, config: Config) -> Result<Self> {
        let suffix = args
            .suffix
            .clone()
            .or(config.suffix)
            .unwrap_or_else(|| DEFAULT_SUFFIX.to_string());
        let marker = args
            .marker
            .clone()
            .or(config.marker)
            .unwrap_or_else(|| DEFAULT_MARKER.to_string());

        if suffix.is_empty() {
            bail!("Ortholog file suffix cannot be empty");
        }

        Ok(Settings {
            input_dir: args.input_dir.clone(),
            outdir: args.outdir.clone(),
            fractions: parse_fractions(&args.fractions)?,
            aligner: CommandTemplate::parse("alignment", &args.align_cmd)?,
            trimmer: CommandTemplate::parse("trimming", &args.trim_cmd)?,
            tree_builder: CommandTemplate::parse("tree", &args.tree_cmd)?,
            suffix,
            marker,
            threads: args.threads.or(config.threads).unwrap_or_else(num_cpus::get),
            skip_tree: args.skip_tree || config.skip_tree.unwrap_or(false),
            check_programs: !args.no_check_programs
                && config.check_programs.unwrap_or(true),
        })
    }

    // --------------------------------------------------
    fn templates(&self) -> Vec<&CommandTemplate> {
        let mut templates = vec![&self.aligner, &self.trimmer];
        if !self.skip_tree {
            templates.push(&self.tree_builder);
        }
        templates
    }
}

/// Names of everything written to the output directory
#[derive(Debug, Clone)]
pub struct OutputPaths {
    dir: PathBuf,
    suffix: String,
}

impl OutputPaths {
    // --------------------------------------------------
    pub fn new(dir: &Path, suffix: &str) -> Self {
        OutputPaths {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
        }
    }

    // --------------------------------------------------
    pub fn gene(&self, gene: &str) -> PathBuf {
        self.dir.join(format!("{gene}{}", self.suffix))
    }

    // --------------------------------------------------
    pub fn aligned(&self, gene: &str) -> PathBuf {
        self.dir.join(format!("{gene}{}_aligned", self.suffix))
    }

    // --------------------------------------------------
    pub fn trimmed(&self, gene: &str) -> PathBuf {
        self.dir.join(format!("{gene}{}_aligned_trimmed", self.suffix))
    }

    // --------------------------------------------------
    pub fn manifest(&self, fraction: &Fraction) -> PathBuf {
        self.dir.join(format!("fraction{fraction}_analyzed_genes.txt"))
    }

    // --------------------------------------------------
    pub fn supermatrix(&self, fraction: &Fraction) -> PathBuf {
        self.dir
            .join(format!("fraction{fraction}_concatenated_trimmed_alignment.faa"))
    }

    // --------------------------------------------------
    pub fn partitions(&self, fraction: &Fraction) -> PathBuf {
        self.dir.join(format!("fraction{fraction}_partitions.nex"))
    }

    // --------------------------------------------------
    pub fn tree_prefix(&self, fraction: &Fraction) -> PathBuf {
        self.dir.join(format!("fraction{fraction}_iqtree_output"))
    }

    // --------------------------------------------------
    pub fn membership(&self) -> PathBuf {
        self.dir.join("gene_membership.tsv")
    }

    // --------------------------------------------------
    pub fn summary(&self) -> PathBuf {
        self.dir.join("run_summary.json")
    }
}

// --------------------------------------------------
pub fn run(args: Args) -> Result<()> {
    let start = Instant::now();
    info!("args = {args:#?}");

    let config = Config::load(args.config.as_deref())?;
    let settings = Settings::new(&args, config)?;
    debug!("settings = {settings:#?}");

    if !settings.input_dir.is_dir() {
        bail!(PipelineError::MissingInput(settings.input_dir.clone()));
    }

    if settings.check_programs {
        for template in settings.templates() {
            template.check_program()?;
        }
    }

    if !settings.outdir.is_dir() {
        fs::create_dir_all(&settings.outdir)?;
    }
    let paths = OutputPaths::new(&settings.outdir, &settings.suffix);
    let mut summary = RunSummary::new(&settings.input_dir, &settings.outdir);

    // Collect orthologs per gene
    println!(">>> Collecting orthologs");
    let collection = collect(&settings.input_dir, &settings.suffix, &settings.marker)?;
    collection.write_genes(&paths)?;
    let membership = collection.membership();
    write_membership(&paths.membership(), &membership)?;
    summary.genomes = collection.genome_count();
    summary.genes = membership.len();

    // Select the genes for each fraction
    println!(">>> Selecting genes for {} fraction(s)", settings.fractions.len());
    let selections =
        select_fractions(&membership, collection.genome_count(), &settings.fractions);
    for selection in &selections {
        write_manifest(&paths.manifest(&selection.fraction), &selection.genes)?;
    }

    // Align only the largest gene set, every other fraction is a subset
    let report = match most_permissive(&selections) {
        Some(selection) if !selection.genes.is_empty() => {
            println!(
                ">>> Aligning {} genes from fraction {}",
                selection.genes.len(),
                selection.fraction
            );
            align_genes(
                &selection.genes,
                &paths,
                &settings.aligner,
                &settings.trimmer,
                settings.threads,
            )?
        }
        _ => AlignmentReport::default(),
    };

    // Concatenate and build a tree per fraction
    println!(">>> Concatenating");
    let mut failed = vec![];
    for selection in &selections {
        match concatenate_fraction(selection, &report, &paths, &settings) {
            Ok(fraction_summary) => summary.fractions.push(fraction_summary),
            Err(e) => {
                error!("Fraction {}: {e}", selection.fraction);
                failed.push(selection.fraction.label().to_string());
                summary.fractions.push(FractionSummary {
                    fraction: selection.fraction.label().to_string(),
                    threshold: selection.fraction.value(),
                    selected_genes: selection.genes.len(),
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        }
    }

    summary.failed_genes = report.failures;
    summary.finish(&paths.summary())?;

    println!(
        r#"Finished in {} seconds, see output in "{}""#,
        start.elapsed().as_secs(),
        settings.outdir.display()
    );

    if !failed.is_empty() {
        bail!(
            "Could not build a supermatrix for fraction(s): {}",
            failed.iter().join(", ")
        );
    }

    Ok(())
}

// --------------------------------------------------
fn concatenate_fraction(
    selection: &Selection,
    report: &AlignmentReport,
    paths: &OutputPaths,
    settings: &Settings,
) -> Result<FractionSummary> {
    let fraction = &selection.fraction;
    let mut fraction_summary = FractionSummary {
        fraction: fraction.label().to_string(),
        threshold: fraction.value(),
        selected_genes: selection.genes.len(),
        ..Default::default()
    };

    let mut alignments: IndexMap<String, TrimmedAlignment> = IndexMap::new();
    for gene in &selection.genes {
        match report.trimmed.get(gene) {
            Some(path) => {
                alignments.insert(gene.clone(), TrimmedAlignment::from_path(gene, path)?);
            }
            None => warn!("Fraction {fraction}: no alignment for {gene}, leaving it out"),
        }
    }

    if alignments.is_empty() {
        info!("Fraction {fraction}: no genes to concatenate");
        return Ok(fraction_summary);
    }

    let genes: Vec<String> = alignments.keys().cloned().collect();
    let matrix = concatenate(&genes, &alignments)?;
    let supermatrix = paths.supermatrix(fraction);
    matrix.write_fasta(&supermatrix)?;
    matrix.write_partitions(&paths.partitions(fraction))?;
    info!(
        r#"Fraction {fraction}: {} genomes x {} columns from {} genes in "{}""#,
        matrix.rows.len(),
        matrix.width(),
        matrix.partitions.len(),
        supermatrix.display()
    );

    fraction_summary.concatenated_genes = matrix.partitions.len();
    fraction_summary.width = Some(matrix.width());
    fraction_summary.supermatrix = Some(supermatrix.clone());

    if !settings.skip_tree {
        println!(">>> Building tree for fraction {fraction}");
        let cmd = settings
            .tree_builder
            .render(&supermatrix, &paths.tree_prefix(fraction));
        let status = match cmd.run() {
            Ok(outcome) if outcome.success => outcome.status(),
            Ok(outcome) => {
                let err = PipelineError::ToolFailed {
                    tool: settings.tree_builder.tool().to_string(),
                    target: format!("fraction {fraction}"),
                    status: outcome.status(),
                    message: outcome.stderr.clone(),
                };
                warn!("{err} [{}]", outcome.command);
                outcome.status()
            }
            Err(e) => {
                warn!("Fraction {fraction}: {e}");
                "not started".to_string()
            }
        };
        fraction_summary.tree = Some(status);
    }

    Ok(fraction_summary)
}

// --------------------------------------------------
pub fn open(filename: &Path) -> Result<Box<dyn BufRead>> {
    Ok(Box::new(BufReader::new(File::open(filename).map_err(
        |e| anyhow!("Cannot read {}: {e}", filename.display()),
    )?)))
}

// --------------------------------------------------
pub fn open_for_write(filename: &Path) -> Result<Box<dyn Write>> {
    Ok(Box::new(BufWriter::new(File::create(filename).map_err(
        |e| anyhow!("Cannot write {}: {e}", filename.display()),
    )?)))
}
