use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to parse configuration")]
    Parse(#[from] serde_yaml::Error),
    #[error("Configuration contains {0} error(s), see log above")]
    Preflight(usize),
    #[error("Invalid worker setup: {0}")]
    InvalidWorkers(String),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // regions every benchmark is evaluated over, the CLI may override these
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    // extension of the per pair result artifact
    #[serde(default = "default_extension")]
    pub artifact_extension: String,
    // extension of the data files searched for inside each model directory
    #[serde(default = "default_extension")]
    pub model_extension: String,
    // evaluator used by all benchmarks without their own evaluator section
    pub evaluator: Option<EvaluatorConfig>,
    // benchmarks in evaluation order
    pub benchmarks: Vec<BenchmarkConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub longname: String,
    pub name: Option<String>,
    // output directory relative to the build directory
    pub output: Option<PathBuf>,
    // longnames of related benchmarks, matched case-insensitively
    #[serde(default)]
    pub relationships: Vec<String>,
    pub evaluator: Option<EvaluatorConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum EvaluatorConfig {
    // spawn an executable once per stage and ingest its YAML report
    Exec {
        exec: PathBuf,
        #[serde(default)]
        params: Vec<String>,
    },
}

impl BenchmarkConfig {
    /// short name used for artifact file names, defaults to the last segment of the longname
    pub fn short_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .longname
                .rsplit('/')
                .next()
                .unwrap_or(&self.longname)
                .trim()
                .to_owned(),
        }
    }

    /// output directory relative to the build directory
    pub fn output_dir(&self) -> PathBuf {
        match &self.output {
            Some(output) => output.clone(),
            None => self
                .longname
                .split('/')
                .map(|segment| segment.trim().replace(' ', ""))
                .filter(|segment| !segment.is_empty())
                .collect(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        if !path.is_file() {
            return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
        }

        let file = File::open(path)?;

        Ok(serde_yaml::from_reader(file)?)
    }

    /// evaluator for a benchmark, falling back to the global evaluator
    pub fn evaluator_for<'a>(&'a self, benchmark: &'a BenchmarkConfig) -> Option<&'a EvaluatorConfig> {
        benchmark.evaluator.as_ref().or(self.evaluator.as_ref())
    }

    /// Check the loaded configuration and return the number of problems found
    ///
    /// All problems are logged instead of stopping at the first one to make debugging easier
    /// for users. Problems that can be repaired (e.g., an empty region list) are only warned
    /// about.
    pub fn preflight_checks(&mut self) -> usize {
        let mut errors = 0;

        if self.benchmarks.is_empty() {
            error!("No benchmark was defined, unable to build a list of work");
            errors += 1;
        }

        if self.regions.is_empty() {
            warn!("The region list is empty. Falling back to the global region");
            self.regions = default_regions();
        }

        if self.artifact_extension.is_empty() || self.artifact_extension.contains('/') {
            error!(
                "artifact_extension '{}' must be a non empty file extension",
                self.artifact_extension
            );
            errors += 1;
        }

        let mut seen = BTreeSet::new();

        for (index, benchmark) in self.benchmarks.iter().enumerate() {
            if benchmark.longname.trim().is_empty() {
                error!("benchmarks[{index}].longname must not be empty");
                errors += 1;
                continue;
            }

            if !seen.insert(benchmark.longname.to_lowercase()) {
                error!(
                    "benchmarks[{index}].longname '{}' is defined more than once",
                    benchmark.longname
                );
                errors += 1;
            }

            let name = benchmark.short_name();
            if name.is_empty() || name.contains('/') {
                error!(
                    "benchmarks[{index}] ({}) has an invalid name '{name}'",
                    benchmark.longname
                );
                errors += 1;
            }

            match self.evaluator_for(benchmark) {
                Some(EvaluatorConfig::Exec { exec, .. }) => match check_executable(exec) {
                    Ok(true) => {}
                    Ok(false) => {
                        error!(
                            "Evaluator for {} at {} is not executable",
                            benchmark.longname,
                            exec.to_string_lossy()
                        );
                        errors += 1;
                    }
                    Err(e) => {
                        error!(
                            "Failed to determine if the evaluator of {} ({}) is an executable: {e}",
                            benchmark.longname,
                            exec.to_string_lossy()
                        );
                        errors += 1;
                    }
                },
                None => {
                    error!(
                        "Benchmark {} has no evaluator and no global evaluator is defined",
                        benchmark.longname
                    );
                    errors += 1;
                }
            }
        }

        let longnames = self
            .benchmarks
            .iter()
            .map(|benchmark| benchmark.longname.to_lowercase())
            .sorted()
            .collect_vec();

        for benchmark in self.benchmarks.iter() {
            for relationship in benchmark.relationships.iter() {
                if longnames
                    .binary_search(&relationship.to_lowercase())
                    .is_err()
                {
                    warn!(
                        "Benchmark {} references {relationship} but {relationship} is not defined",
                        benchmark.longname
                    );
                }
            }
        }

        errors
    }
}

fn default_regions() -> Vec<String> {
    vec!["global".to_owned()]
}

fn default_extension() -> String {
    "nc".to_owned()
}
