use crate::{error::PipelineError, open, open_for_write};
use anyhow::{anyhow, bail, Result};
use bio::io::fasta;
use indexmap::{IndexMap, IndexSet};
use kseq::parse_reader;
use log::{debug, warn};
use regex::Regex;
use std::{
    fs,
    io::{BufRead, Write},
    path::Path,
};

/// Padding character for genomes missing a gene
pub const GAP: char = '-';

/// One gene's trimmed alignment: genome to aligned row, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedAlignment {
    pub gene: String,
    pub rows: IndexMap<String, String>,
}

impl TrimmedAlignment {
    // --------------------------------------------------
    /// Read a FASTA alignment whose headers are genome IDs
    pub fn from_path(gene: &str, path: &Path) -> Result<Self> {
        if fs::metadata(path)
            .map_err(|e| anyhow!("Cannot read {}: {e}", path.display()))?
            .len()
            == 0
        {
            return Err(PipelineError::EmptyAlignment(path.to_path_buf()).into());
        }

        let mut reader = parse_reader(open(path)?)?;
        let mut rows = IndexMap::new();
        while let Some(rec) = reader.iter_record()? {
            let genome = rec.head().trim().to_string();
            if rows.insert(genome.clone(), rec.seq().to_string()).is_some() {
                warn!(
                    r#"Genome "{genome}" appears more than once in "{}", keeping the last"#,
                    path.display()
                );
            }
        }

        if rows.is_empty() {
            return Err(PipelineError::EmptyAlignment(path.to_path_buf()).into());
        }

        Ok(TrimmedAlignment {
            gene: gene.to_string(),
            rows,
        })
    }

    // --------------------------------------------------
    /// Length shared by every row
    pub fn width(&self) -> Result<usize, PipelineError> {
        let mut rows = self.rows.iter();
        let (_, first) = rows
            .next()
            .ok_or_else(|| PipelineError::NoReferenceRow(self.gene.clone()))?;
        let expected = first.len();

        for (genome, row) in rows {
            if row.len() != expected {
                return Err(PipelineError::UnequalRowLengths {
                    gene: self.gene.clone(),
                    genome: genome.clone(),
                    expected,
                    found: row.len(),
                });
            }
        }

        Ok(expected)
    }
}

/// Where a gene sits in the supermatrix, 1-based and inclusive
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub gene: String,
    pub start: usize,
    pub end: usize,
}

impl Partition {
    // --------------------------------------------------
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }
}

/// Per-genome concatenation of several genes' alignments
#[derive(Debug, Clone, PartialEq)]
pub struct Supermatrix {
    pub rows: IndexMap<String, String>,
    pub partitions: Vec<Partition>,
}

impl Supermatrix {
    // --------------------------------------------------
    /// Total number of columns
    pub fn width(&self) -> usize {
        self.partitions.last().map_or(0, |p| p.end)
    }

    // --------------------------------------------------
    /// One ">genome" record per row, each sequence on a single line
    pub fn write_fasta(&self, path: &Path) -> Result<()> {
        let mut writer = fasta::Writer::new(open_for_write(path)?);
        for (genome, row) in &self.rows {
            writer
                .write(genome, None, row.as_bytes())
                .map_err(|e| anyhow!("Cannot write {}: {e}", path.display()))?;
        }
        writer.flush()?;
        Ok(())
    }

    // --------------------------------------------------
    /// NEXUS sets block with one charset per gene
    pub fn write_partitions(&self, path: &Path) -> Result<()> {
        let mut output = open_for_write(path)?;
        writeln!(output, "#nexus")?;
        writeln!(output, "begin sets;")?;
        for part in &self.partitions {
            writeln!(
                output,
                "    charset {} = {}-{};",
                part.gene, part.start, part.end
            )?;
        }
        writeln!(output, "end;")?;
        output.flush()?;
        Ok(())
    }

    // --------------------------------------------------
    /// Cut the rows back into per-gene alignments, leaving out rows that
    /// are nothing but padding.
    pub fn split(&self) -> Result<IndexMap<String, IndexMap<String, String>>> {
        let mut genes = IndexMap::new();
        for part in &self.partitions {
            let mut rows = IndexMap::new();
            for (genome, row) in &self.rows {
                let Some(slice) = row.get(part.start - 1..part.end) else {
                    bail!(
                        r#"Row "{genome}" has no columns {}-{} for "{}""#,
                        part.start,
                        part.end,
                        part.gene
                    );
                };
                if !slice.chars().all(|c| c == GAP) {
                    rows.insert(genome.clone(), slice.to_string());
                }
            }
            genes.insert(part.gene.clone(), rows);
        }
        Ok(genes)
    }
}

// --------------------------------------------------
/// Concatenate `genes` in the given order. Rows appear in the order genomes
/// are first seen across the alignments; a genome missing a gene gets a run
/// of gaps as wide as that gene's alignment.
pub fn concatenate(
    genes: &[String],
    alignments: &IndexMap<String, TrimmedAlignment>,
) -> Result<Supermatrix, PipelineError> {
    let mut genomes: IndexSet<&str> = IndexSet::new();
    let mut partitions = vec![];
    let mut start = 1;
    for gene in genes {
        let alignment = alignments
            .get(gene)
            .ok_or_else(|| PipelineError::NoReferenceRow(gene.clone()))?;
        let width = alignment.width()?;
        if width == 0 {
            warn!(r#"Gene "{gene}" has no columns left after trimming, leaving it out"#);
            continue;
        }
        genomes.extend(alignment.rows.keys().map(String::as_str));
        partitions.push(Partition {
            gene: gene.clone(),
            start,
            end: start + width - 1,
        });
        start += width;
    }

    let total = start - 1;
    let mut rows = IndexMap::new();
    for genome in genomes {
        let mut row = String::with_capacity(total);
        for part in &partitions {
            match alignments[&part.gene].rows.get(genome) {
                Some(seq) => row.push_str(seq),
                None => row.extend(std::iter::repeat(GAP).take(part.len())),
            }
        }
        rows.insert(genome.to_string(), row);
    }

    debug!("Concatenated {} genes into {total} columns", partitions.len());
    Ok(Supermatrix { rows, partitions })
}

// --------------------------------------------------
/// Parse the charsets of a NEXUS partition file
pub fn read_partitions(path: &Path) -> Result<Vec<Partition>> {
    let charset = Regex::new(r"(?i)^\s*charset\s+(\S+)\s*=\s*(\d+)\s*-\s*(\d+)\s*;")?;

    let mut partitions = vec![];
    for line in open(path)?.lines() {
        let line = line?;
        if let Some(caps) = charset.captures(&line) {
            let start: usize = caps[2].parse()?;
            let end: usize = caps[3].parse()?;
            if start == 0 || end < start {
                bail!(r#"Bad range {start}-{end} for "{}""#, &caps[1]);
            }
            partitions.push(Partition {
                gene: caps[1].to_string(),
                start,
                end,
            });
        }
    }

    Ok(partitions)
}

// --------------------------------------------------
/// Read a supermatrix FASTA back in
pub fn read_rows(path: &Path) -> Result<IndexMap<String, String>> {
    let mut reader = parse_reader(open(path)?)?;
    let mut rows = IndexMap::new();
    while let Some(rec) = reader.iter_record()? {
        rows.insert(rec.head().trim().to_string(), rec.seq().to_string());
    }
    Ok(rows)
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{
        concatenate, read_partitions, read_rows, Partition, Supermatrix,
        TrimmedAlignment,
    };
    use crate::error::PipelineError;
    use anyhow::Result;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use std::{fs, path::PathBuf};
    use tempfile::tempdir;

    fn alignment(gene: &str, rows: &[(&str, &str)]) -> TrimmedAlignment {
        TrimmedAlignment {
            gene: gene.to_string(),
            rows: rows
                .iter()
                .map(|(g, s)| (g.to_string(), s.to_string()))
                .collect(),
        }
    }

    fn alignments(list: Vec<TrimmedAlignment>) -> IndexMap<String, TrimmedAlignment> {
        list.into_iter().map(|a| (a.gene.clone(), a)).collect()
    }

    fn genes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_from_path() -> Result<()> {
        let aln = TrimmedAlignment::from_path(
            "1001at2",
            &PathBuf::from("tests/inputs/aligned/1001at2.faa_aligned_trimmed"),
        )?;
        let genomes: Vec<_> = aln.rows.keys().map(String::as_str).collect();
        assert_eq!(genomes, ["genomeA", "genomeB", "genomeC"]);
        assert_eq!(aln.rows["genomeA"], "MKVLAAGIVRSE");
        assert_eq!(aln.width()?, 12);
        Ok(())
    }

    #[test]
    fn test_from_path_empty() {
        let res = TrimmedAlignment::from_path(
            "empty",
            &PathBuf::from("tests/inputs/aligned/empty.faa_aligned_trimmed"),
        );
        assert!(matches!(
            res.unwrap_err().downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyAlignment(_))
        ));
    }

    #[test]
    fn test_unequal_rows() -> Result<()> {
        let aln = TrimmedAlignment::from_path(
            "uneven",
            &PathBuf::from("tests/inputs/aligned/uneven.faa_aligned_trimmed"),
        )?;
        let res = aln.width();
        assert_eq!(
            res.unwrap_err().to_string(),
            r#"Gene "uneven": row for "genomeB" has length 7, expected 8"#
        );

        // The whole concatenation fails with it
        let res = concatenate(&genes(&["uneven"]), &alignments(vec![aln]));
        assert!(matches!(res, Err(PipelineError::UnequalRowLengths { .. })));
        Ok(())
    }

    #[test]
    fn test_padding() -> Result<()> {
        let a = alignment("A", &[("g1", "MKV"), ("g2", "MKI"), ("g3", "MRV")]);
        let b_g1 = "-".repeat(60) + &"Q".repeat(60);
        let b_g2 = "W".repeat(120);
        let b = alignment("B", &[("g1", &b_g1), ("g2", &b_g2)]);
        let matrix = concatenate(&genes(&["A", "B"]), &alignments(vec![a, b]))?;

        assert_eq!(matrix.width(), 123);
        assert_eq!(matrix.rows["g3"], format!("MRV{}", "-".repeat(120)));
        for row in matrix.rows.values() {
            assert_eq!(row.len(), 123);
        }
        assert_eq!(
            matrix.partitions,
            [
                Partition {
                    gene: "A".to_string(),
                    start: 1,
                    end: 3
                },
                Partition {
                    gene: "B".to_string(),
                    start: 4,
                    end: 123
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_order() -> Result<()> {
        // Genome g9 only appears in the second gene
        let a = alignment("A", &[("g2", "AA"), ("g1", "CC")]);
        let b = alignment("B", &[("g9", "TTT"), ("g1", "GGG")]);
        let list = alignments(vec![a, b]);

        let matrix = concatenate(&genes(&["B", "A"]), &list)?;
        let genomes: Vec<_> = matrix.rows.keys().map(String::as_str).collect();
        assert_eq!(genomes, ["g9", "g1", "g2"]);

        // Columns follow the requested gene order
        assert_eq!(matrix.rows["g1"], "GGGCC");
        assert_eq!(matrix.rows["g9"], "TTT--");
        assert_eq!(matrix.rows["g2"], "---AA");
        Ok(())
    }

    #[test]
    fn test_missing_alignment() {
        let res = concatenate(&genes(&["A"]), &IndexMap::new());
        assert!(matches!(res, Err(PipelineError::NoReferenceRow(_))));
    }

    #[test]
    fn test_nothing_to_concatenate() -> Result<()> {
        let matrix = concatenate(&[], &IndexMap::new())?;
        assert!(matrix.rows.is_empty());
        assert_eq!(matrix.width(), 0);
        Ok(())
    }

    #[test]
    fn test_split_round_trip() -> Result<()> {
        let a = alignment("A", &[("g1", "MK-V"), ("g2", "MKIV")]);
        let b = alignment("B", &[("g2", "W-W"), ("g3", "WWW")]);
        let list = alignments(vec![a.clone(), b.clone()]);
        let matrix = concatenate(&genes(&["A", "B"]), &list)?;

        let split = matrix.split()?;
        assert_eq!(split["A"], a.rows);
        assert_eq!(split["B"], b.rows);
        Ok(())
    }

    #[test]
    fn test_write_and_read_back() -> Result<()> {
        let outdir = tempdir()?;
        let fasta = outdir.path().join("matrix.faa");
        let nexus = outdir.path().join("matrix.nex");

        let a = alignment("1001at2", &[("gA", "MKV"), ("gB", "MRV")]);
        let b = alignment("1002at2", &[("gA", "WW")]);
        let matrix = concatenate(&genes(&["1001at2", "1002at2"]), &alignments(vec![a, b]))?;
        matrix.write_fasta(&fasta)?;
        matrix.write_partitions(&nexus)?;

        assert_eq!(fs::read_to_string(&fasta)?, ">gA\nMKVWW\n>gB\nMRV--\n");
        assert_eq!(
            fs::read_to_string(&nexus)?,
            "#nexus\nbegin sets;\n    charset 1001at2 = 1-3;\n    charset 1002at2 = 4-5;\nend;\n"
        );

        let reread = Supermatrix {
            rows: read_rows(&fasta)?,
            partitions: read_partitions(&nexus)?,
        };
        assert_eq!(reread, matrix);
        Ok(())
    }

    #[test]
    fn test_split_bad_partition() {
        let matrix = Supermatrix {
            rows: IndexMap::from([("g1".to_string(), "MKV".to_string())]),
            partitions: vec![Partition {
                gene: "A".to_string(),
                start: 2,
                end: 9,
            }],
        };
        assert!(matrix.split().is_err());
    }
}
