use anyhow::{bail, Result};
use bio::io::fasta;
use clap::Parser;
use orthocat::{
    concat::{read_partitions, read_rows, Supermatrix},
    open_for_write,
};
use std::{fs, path::PathBuf};

/// Split a supermatrix back into per-gene alignments
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Concatenated alignment (FASTA)
    #[arg(value_name = "SUPERMATRIX")]
    pub supermatrix: PathBuf,

    /// NEXUS partition file written alongside the supermatrix
    #[arg(value_name = "PARTITIONS")]
    pub partitions: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "OUTDIR", default_value = "orthocat-split")]
    pub outdir: PathBuf,

    /// Suffix for the per-gene files
    #[arg(short, long, value_name = "SUFFIX", default_value = ".faa")]
    pub suffix: String,
}

// --------------------------------------------------
fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

// --------------------------------------------------
pub fn run(args: Args) -> Result<()> {
    let matrix = Supermatrix {
        rows: read_rows(&args.supermatrix)?,
        partitions: read_partitions(&args.partitions)?,
    };

    if matrix.partitions.is_empty() {
        bail!(r#"No charsets found in "{}""#, args.partitions.display());
    }

    let width = matrix.width();
    for (genome, row) in &matrix.rows {
        if row.len() != width {
            bail!(
                r#"Row "{genome}" has {} columns but the partitions cover {width}"#,
                row.len()
            );
        }
    }

    fs::create_dir_all(&args.outdir)?;
    for (gene, rows) in matrix.split()? {
        let path = args.outdir.join(format!("{gene}{}", args.suffix));
        let mut writer = fasta::Writer::new(open_for_write(&path)?);
        for (genome, row) in &rows {
            writer.write(genome, None, row.as_bytes())?;
        }
        writer.flush()?;
        println!("{gene}: {} rows", rows.len());
    }

    Ok(())
}
