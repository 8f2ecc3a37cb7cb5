use super::{EvaluationError, Evaluator, Failure, FailureKind, Stage};
use crate::{
    benchmark::{BenchmarkEntry, Relationship},
    model::ModelEntry,
    work::Pair,
};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Output, Stdio},
};
use tracing::{debug, trace, warn};

/// What an evaluator prints to stdout at the end of a stage
///
/// An empty stdout counts as `Ok` without a score.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageReport {
    Ok {
        #[serde(default)]
        score: Option<f64>,
    },
    Failed {
        kind: FailureKind,
        #[serde(default)]
        message: String,
    },
}

/// Evaluator spawning an executable once per stage
///
/// The executable is called as `<exec> <params..> <stage> <arguments..>` and reports back through
/// a YAML `StageReport` on stdout. No timeout is applied, a stage runs until the executable exits.
#[derive(Debug, Clone)]
pub struct ExecEvaluator<'a> {
    exec: &'a Path,
    params: &'a [String],
}

impl<'a> ExecEvaluator<'a> {
    pub fn new(exec: &'a Path, params: &'a [String]) -> Self {
        Self { exec, params }
    }

    fn benchmark_arguments(benchmark: &BenchmarkEntry) -> Vec<OsString> {
        let mut arguments = vec![
            "--benchmark".into(),
            benchmark.longname.clone().into(),
            "--name".into(),
            benchmark.name.clone().into(),
            "--output".into(),
            benchmark.output.clone().into_os_string(),
            "--regions".into(),
            benchmark.regions.join(",").into(),
        ];

        for relationship in benchmark.relationships.iter() {
            match relationship {
                Relationship::Resolved {
                    longname, output, ..
                } => {
                    let mut related = OsString::from(format!("{longname}="));
                    related.push(output.as_os_str());

                    arguments.push("--related".into());
                    arguments.push(related);
                }
                Relationship::Unresolved(longname) => {
                    trace!(benchmark = %benchmark.longname, related = %longname, "Skipping unresolved relationship");
                }
            }
        }

        arguments
    }

    fn pair_arguments(pair: Pair<'_>) -> Vec<OsString> {
        let mut arguments = Self::benchmark_arguments(pair.benchmark);

        arguments.extend([
            "--model".into(),
            pair.model.name.clone().into(),
            "--model-path".into(),
            pair.model.path.clone().into_os_string(),
            "--color".into(),
            pair.model.color.to_string().into(),
            "--artifact".into(),
            pair.benchmark.artifact_path(pair.model).into_os_string(),
        ]);

        for file in pair.model.files.iter() {
            arguments.push("--model-file".into());
            arguments.push(file.clone().into_os_string());
        }

        arguments
    }

    fn models_arguments(benchmark: &BenchmarkEntry, models: &[ModelEntry]) -> Vec<OsString> {
        models
            .iter()
            .flat_map(|model| {
                let mut entry = OsString::from(format!("{}=", model.name));
                entry.push(benchmark.artifact_path(model).as_os_str());

                ["--artifact".into(), entry]
            })
            .collect_vec()
    }

    #[tracing::instrument(level = "debug", skip(self, arguments), fields(exec = ?self.exec))]
    fn run(&self, stage: Stage, arguments: Vec<OsString>) -> Result<Option<f64>, EvaluationError> {
        let output = Command::new(self.exec)
            .args(self.params)
            .arg(stage.as_str())
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| EvaluationError::Spawn {
                exec: self.exec.to_string_lossy().into_owned(),
                source,
            })?;

        ingest(stage, output)
    }
}

/// Turn the output of a finished stage into a score or a failure
pub fn ingest(stage: Stage, output: Output) -> Result<Option<f64>, EvaluationError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    debug!("Evaluator exit status: {:?}", output.status);
    trace!(stderr = %stderr, "Evaluator stderr");

    let crashed = || EvaluationError::Crashed {
        stage,
        status: output.status.to_string(),
        stderr: stderr.trim().to_owned(),
    };

    if stdout.trim().is_empty() {
        return if output.status.success() {
            Ok(None)
        } else {
            Err(crashed())
        };
    }

    let report = match serde_yaml::from_str::<StageReport>(&stdout) {
        Ok(report) => report,
        // a report that can't be read from a crashed evaluator is most likely a stack trace
        Err(_) if !output.status.success() => return Err(crashed()),
        Err(e) => {
            warn!("Evaluator report could not be read: {e}");

            return Err(e.into());
        }
    };

    match report {
        StageReport::Failed { kind, message } => Err(Failure::new(kind, message).into()),
        StageReport::Ok { .. } if !output.status.success() => Err(crashed()),
        StageReport::Ok { score } => Ok(score),
    }
}

impl Evaluator for ExecEvaluator<'_> {
    fn confront(&self, pair: Pair<'_>) -> Result<(), EvaluationError> {
        self.run(Stage::Confront, Self::pair_arguments(pair))
            .map(|_| ())
    }

    fn determine_plot_limits(
        &self,
        benchmark: &BenchmarkEntry,
        models: &[ModelEntry],
    ) -> Result<(), EvaluationError> {
        let mut arguments = Self::benchmark_arguments(benchmark);
        arguments.extend(Self::models_arguments(benchmark, models));

        self.run(Stage::Limits, arguments).map(|_| ())
    }

    fn score(&self, pair: Pair<'_>) -> Result<Option<f64>, EvaluationError> {
        self.run(Stage::Score, Self::pair_arguments(pair))
    }

    fn composite(
        &self,
        benchmark: &BenchmarkEntry,
        models: &[ModelEntry],
    ) -> Result<(), EvaluationError> {
        let mut arguments = Self::benchmark_arguments(benchmark);
        arguments.extend(Self::models_arguments(benchmark, models));

        self.run(Stage::Composite, arguments).map(|_| ())
    }

    fn summarize(
        &self,
        benchmarks: &[BenchmarkEntry],
        models: &[ModelEntry],
        scores: &Path,
    ) -> Result<(), EvaluationError> {
        let mut arguments: Vec<OsString> = vec!["--scores".into(), scores.into()];

        for benchmark in benchmarks {
            let mut report = OsString::from(format!("{}=", benchmark.longname));
            report.push(benchmark.output.as_os_str());

            arguments.push("--report".into());
            arguments.push(report);
        }

        for model in models {
            arguments.push("--model".into());
            arguments.push(format!("{}={}", model.name, model.color).into());
        }

        self.run(Stage::Summarize, arguments).map(|_| ())
    }
}
