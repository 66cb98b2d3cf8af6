use crate::error::PipelineError;
use anyhow::Result;
use log::debug;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Name of the config file looked up in the home directory when no
/// `--config` is given
pub const DEFAULT_CONFIG_NAME: &str = ".orthocat.toml";

/// Optional settings read from a TOML file. Every key may be omitted;
/// command-line options take precedence over these.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Suffix of the per-gene ortholog files, e.g. ".faa"
    pub suffix: Option<String>,

    /// Name of the directory holding the single-copy ortholog files
    pub marker: Option<String>,

    /// Worker threads for the alignment phase
    pub threads: Option<usize>,

    /// Write supermatrices without building trees
    pub skip_tree: Option<bool>,

    /// Verify that every template program can be found before starting
    pub check_programs: Option<bool>,
}

impl Config {
    // --------------------------------------------------
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| PipelineError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if config.threads == Some(0) {
            return Err(PipelineError::Config {
                path: path.to_path_buf(),
                reason: "threads must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(config)
    }

    // --------------------------------------------------
    /// Load the explicitly named file, else the one in the home directory
    /// if there is one, else the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            debug!(r#"Reading config "{}""#, path.display());
            return Self::from_file(path);
        }

        match home_config() {
            Some(path) if path.is_file() => {
                debug!(r#"Reading config "{}""#, path.display());
                Self::from_file(&path)
            }
            _ => Ok(Config::default()),
        }
    }
}

// --------------------------------------------------
#[allow(deprecated)]
fn home_config() -> Option<PathBuf> {
    homedir::my_home()
        .ok()
        .flatten()
        .map(|home| home.join(DEFAULT_CONFIG_NAME))
}
