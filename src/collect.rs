use crate::{error::PipelineError, open, open_for_write, OutputPaths};
use anyhow::{anyhow, Result};
use bio::io::fasta;
use csv::WriterBuilder;
use indexmap::IndexMap;
use itertools::Itertools;
use kseq::parse_reader;
use log::{debug, info, warn};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Gene ID to the genomes carrying it, both in first-discovery order
pub type GeneMembership = IndexMap<String, Vec<String>>;

/// One ortholog sequence, relabeled with the genome it came from
#[derive(Debug, Clone, PartialEq)]
pub struct OrthologRecord {
    pub genome: String,
    pub gene: String,
    pub residues: String,
}

/// Everything gathered from one walk of the input tree
#[derive(Debug, Default)]
pub struct Collection {
    /// Genomes in discovery order
    pub genomes: Vec<String>,

    /// Records grouped by gene, genes in discovery order
    pub genes: IndexMap<String, Vec<OrthologRecord>>,
}

impl Collection {
    // --------------------------------------------------
    pub fn genome_count(&self) -> usize {
        self.genomes.len()
    }

    // --------------------------------------------------
    pub fn membership(&self) -> GeneMembership {
        self.genes
            .iter()
            .map(|(gene, records)| {
                let genomes: Vec<String> = records
                    .iter()
                    .map(|rec| rec.genome.clone())
                    .unique()
                    .collect();
                (gene.clone(), genomes)
            })
            .collect()
    }

    // --------------------------------------------------
    /// Write one FASTA file per gene with a ">genome" record for every
    /// genome carrying it. Existing files are replaced.
    pub fn write_genes(&self, paths: &OutputPaths) -> Result<Vec<PathBuf>> {
        let mut written = vec![];
        for (gene, records) in &self.genes {
            let path = paths.gene(gene);
            let mut writer = fasta::Writer::new(open_for_write(&path)?);
            for rec in records {
                writer
                    .write(&rec.genome, None, rec.residues.as_bytes())
                    .map_err(|e| anyhow!("Cannot write {}: {e}", path.display()))?;
            }
            writer.flush()?;
            written.push(path);
        }

        info!("Wrote {} per-gene ortholog files", written.len());
        Ok(written)
    }
}

// --------------------------------------------------
/// Walk `input_dir` in file-name order and gather every file ending in
/// `suffix` whose parent directory name ends in `marker`. The genome is the
/// first path component below `input_dir`, the gene is the file name
/// without `suffix`.
pub fn collect(input_dir: &Path, suffix: &str, marker: &str) -> Result<Collection> {
    if !input_dir.is_dir() {
        return Err(PipelineError::MissingInput(input_dir.to_path_buf()).into());
    }

    info!(
        r#"Collecting "*{suffix}" files under "*{marker}" in "{}""#,
        input_dir.display()
    );

    let mut collection = Collection::default();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        // Follows symlinked ortholog files
        if !path.is_file() {
            continue;
        }

        let Some((genome, gene)) = ortholog_ids(input_dir, path, suffix, marker) else {
            continue;
        };

        // Genome names become FASTA headers, which end at whitespace
        if genome.chars().any(char::is_whitespace) {
            return Err(PipelineError::InvalidGenomeId(genome).into());
        }

        let records = collection.genes.entry(gene.clone()).or_default();
        if records.iter().any(|rec| rec.genome == genome) {
            warn!(
                r#"Genome "{genome}" has more than one "{gene}" file, skipping "{}""#,
                path.display()
            );
            continue;
        }

        let mut num_records = 0;
        if path.metadata()?.len() > 0 {
            let mut reader = parse_reader(open(path)?)?;
            while let Some(rec) = reader.iter_record()? {
                records.push(OrthologRecord {
                    genome: genome.clone(),
                    gene: gene.clone(),
                    residues: rec.seq().to_string(),
                });
                num_records += 1;
            }
        }
        debug!(r#"{genome}/{gene}: {num_records} record(s) from "{}""#, path.display());

        if num_records == 0 {
            warn!(r#"No sequences in "{}""#, path.display());
        } else if !collection.genomes.contains(&genome) {
            collection.genomes.push(genome);
        }
    }

    // Neither a gene nor a genome is counted from empty files alone
    collection.genes.retain(|_, records| !records.is_empty());

    info!(
        "Found {} genes across {} genomes",
        collection.genes.len(),
        collection.genome_count()
    );
    Ok(collection)
}

// --------------------------------------------------
/// Genome and gene IDs for an eligible ortholog file, None otherwise
fn ortholog_ids(
    input_dir: &Path,
    path: &Path,
    suffix: &str,
    marker: &str,
) -> Option<(String, String)> {
    let file_name = path.file_name()?.to_str()?;
    let gene = file_name.strip_suffix(suffix)?;
    if gene.is_empty() {
        return None;
    }

    let parent = path.parent()?.file_name()?.to_str()?;
    if !parent.ends_with(marker) {
        return None;
    }

    let relative = path.strip_prefix(input_dir).ok()?;
    let mut components = relative.components();
    let genome = match components.next()? {
        Component::Normal(name) => name.to_str()?,
        _ => return None,
    };

    // The file itself can't also be the genome
    components.next()?;

    Some((genome.to_string(), gene.to_string()))
}

// --------------------------------------------------
/// Tab-separated audit table of which genomes carry which gene
pub fn write_membership(path: &Path, membership: &GeneMembership) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(open_for_write(path)?);

    wtr.write_record(["gene", "genomes", "members"])?;
    for (gene, genomes) in membership {
        wtr.write_record([
            gene.to_string(),
            genomes.len().to_string(),
            genomes.join(","),
        ])?;
    }
    wtr.flush()?;

    Ok(())
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{collect, ortholog_ids, write_membership, OrthologRecord};
    use crate::{error::PipelineError, OutputPaths};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{fs, path::PathBuf};
    use tempfile::tempdir;

    const INPUT: &str = "tests/inputs/busco";
    const SUFFIX: &str = ".faa";
    const MARKER: &str = "single_copy_busco_sequences";

    #[test]
    fn test_ortholog_ids() {
        let root = PathBuf::from("in");
        let ok = root.join("gA/run/busco_sequences/single_copy_busco_sequences/7at2.faa");
        assert_eq!(
            ortholog_ids(&root, &ok, SUFFIX, MARKER),
            Some(("gA".to_string(), "7at2".to_string()))
        );

        // Right suffix, wrong directory
        let multi = root.join("gA/run/busco_sequences/multi_copy_busco_sequences/7at2.faa");
        assert_eq!(ortholog_ids(&root, &multi, SUFFIX, MARKER), None);

        // Right directory, wrong suffix
        let txt = root.join("gA/run/busco_sequences/single_copy_busco_sequences/7at2.txt");
        assert_eq!(ortholog_ids(&root, &txt, SUFFIX, MARKER), None);

        // The marker only needs to end the directory name
        let prefixed = root.join("gB/x_single_copy_busco_sequences/8at2.faa");
        assert_eq!(
            ortholog_ids(&root, &prefixed, SUFFIX, MARKER),
            Some(("gB".to_string(), "8at2".to_string()))
        );

        // Only the trailing suffix is removed
        let dotted = root.join("gC/single_copy_busco_sequences/a.faa.faa");
        assert_eq!(
            ortholog_ids(&root, &dotted, SUFFIX, MARKER),
            Some(("gC".to_string(), "a.faa".to_string()))
        );
    }

    #[test]
    fn test_collect() -> Result<()> {
        let collection = collect(&PathBuf::from(INPUT), SUFFIX, MARKER)?;
        assert_eq!(collection.genomes, ["genomeA", "genomeB", "genomeC"]);

        // Genes keep their discovery order
        let membership: Vec<_> = collection.membership().into_iter().collect();
        assert_eq!(
            membership,
            Vec::from([
                (
                    "1001at2".to_string(),
                    vec![
                        "genomeA".to_string(),
                        "genomeB".to_string(),
                        "genomeC".to_string()
                    ]
                ),
                (
                    "1002at2".to_string(),
                    vec!["genomeA".to_string(), "genomeB".to_string()]
                ),
                ("1003at2".to_string(), vec!["genomeA".to_string()]),
            ])
        );

        // Multi-line sequences are joined, headers replaced
        assert_eq!(
            collection.genes["1001at2"][0],
            OrthologRecord {
                genome: "genomeA".to_string(),
                gene: "1001at2".to_string(),
                residues: "MKVLAAGIVRSE".to_string(),
            }
        );
        assert_eq!(collection.genes["1002at2"][1].residues, "MSTNAKQL");

        Ok(())
    }

    #[test]
    fn test_collect_empty() -> Result<()> {
        let dir = tempdir()?;
        let collection = collect(dir.path(), SUFFIX, MARKER)?;
        assert_eq!(collection.genome_count(), 0);
        assert!(collection.membership().is_empty());
        Ok(())
    }

    #[test]
    fn test_collect_whitespace_genome() -> Result<()> {
        let dir = tempdir()?;
        for genome in ["gA x", "gA y"] {
            let marker_dir = dir.path().join(genome).join(MARKER);
            fs::create_dir_all(&marker_dir)?;
            fs::write(marker_dir.join("1at2.faa"), ">h\nMKV\n")?;
        }

        let res = collect(dir.path(), SUFFIX, MARKER);
        assert!(matches!(
            res.unwrap_err().downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidGenomeId(genome)) if genome == "gA x"
        ));
        Ok(())
    }

    #[test]
    fn test_collect_empty_file() -> Result<()> {
        let dir = tempdir()?;
        let gene_a = dir.path().join("gA").join(MARKER);
        let gene_b = dir.path().join("gB").join(MARKER);
        fs::create_dir_all(&gene_a)?;
        fs::create_dir_all(&gene_b)?;
        fs::write(gene_a.join("1at2.faa"), ">h\nMKV\n")?;
        fs::write(gene_b.join("1at2.faa"), "")?;
        fs::write(gene_b.join("2at2.faa"), "")?;

        // gB only has empty files so it carries nothing
        let collection = collect(dir.path(), SUFFIX, MARKER)?;
        assert_eq!(collection.genomes, ["gA"]);
        let membership: Vec<_> = collection.membership().into_iter().collect();
        assert_eq!(
            membership,
            Vec::from([("1at2".to_string(), vec!["gA".to_string()])])
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_symlinked_file() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("source.fa");
        fs::write(&source, ">h\nMKV\n")?;

        let root = dir.path().join("busco");
        let marker_dir = root.join("gA").join(MARKER);
        fs::create_dir_all(&marker_dir)?;
        std::os::unix::fs::symlink(&source, marker_dir.join("1at2.faa"))?;

        let collection = collect(&root, SUFFIX, MARKER)?;
        assert_eq!(collection.genomes, ["gA"]);
        assert_eq!(collection.genes["1at2"][0].residues, "MKV");
        Ok(())
    }

    #[test]
    fn test_collect_missing_input() {
        let res = collect(&PathBuf::from("tests/inputs/does-not-exist"), SUFFIX, MARKER);
        assert!(res.is_err());
        assert!(matches!(
            res.unwrap_err().downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput(_))
        ));
    }

    #[test]
    fn test_write_genes() -> Result<()> {
        let outdir = tempdir()?;
        let paths = OutputPaths::new(outdir.path(), SUFFIX);
        let collection = collect(&PathBuf::from(INPUT), SUFFIX, MARKER)?;

        let written = collection.write_genes(&paths)?;
        assert_eq!(written.len(), 3);

        let actual = fs::read_to_string(outdir.path().join("1001at2.faa"))?;
        assert_eq!(
            actual,
            ">genomeA\nMKVLAAGIVRSE\n>genomeB\nMKVLSAGIVRSE\n>genomeC\nMKILAAGLVRSE\n"
        );

        // Rerunning replaces rather than appends
        collection.write_genes(&paths)?;
        let again = fs::read_to_string(outdir.path().join("1001at2.faa"))?;
        assert_eq!(actual, again);

        Ok(())
    }

    #[test]
    fn test_write_membership() -> Result<()> {
        let outdir = tempdir()?;
        let path = outdir.path().join("gene_membership.tsv");
        let collection = collect(&PathBuf::from(INPUT), SUFFIX, MARKER)?;
        write_membership(&path, &collection.membership())?;

        let actual = fs::read_to_string(&path)?;
        assert_eq!(
            actual,
            "gene\tgenomes\tmembers\n\
             1001at2\t3\tgenomeA,genomeB,genomeC\n\
             1002at2\t2\tgenomeA,genomeB\n\
             1003at2\t1\tgenomeA\n"
        );
        Ok(())
    }
}
