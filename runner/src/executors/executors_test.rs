use super::*;
use crate::{
    config::EvaluatorConfig,
    database::{ledger_path, Ledger, PairStatus},
    distributed::local::LocalGroup,
    evaluation::{Failure, FailureKind},
    model::distinct_colors,
    work::Pair,
};
use itertools::Itertools;
use parking_lot::Mutex;
use std::path::Path;
use tempfile::TempDir;

/// Evaluator that writes empty artifacts and remembers every call
#[derive(Default)]
struct ScriptedEvaluator {
    // models whose evaluation fails with an expected failure
    failing: Vec<String>,
    // model whose evaluation breaks the evaluator
    broken: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    fn calls(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Evaluator for ScriptedEvaluator {
    fn confront(&self, pair: Pair<'_>) -> Result<(), EvaluationError> {
        self.record(format!(
            "confront {} {}",
            pair.benchmark.name, pair.model.name
        ));

        if self.broken.as_deref() == Some(pair.model.name.as_str()) {
            return Err(EvaluationError::Crashed {
                stage: Stage::Confront,
                status: "exit status: 1".to_owned(),
                stderr: "segmentation fault".to_owned(),
            });
        }

        if self.failing.contains(&pair.model.name) {
            return Err(Failure::new(FailureKind::VarNotInModel, "gpp is missing").into());
        }

        std::fs::write(pair.benchmark.artifact_path(pair.model), "artifact").unwrap();

        Ok(())
    }

    fn determine_plot_limits(
        &self,
        benchmark: &BenchmarkEntry,
        _models: &[ModelEntry],
    ) -> Result<(), EvaluationError> {
        self.record(format!("limits {}", benchmark.name));
        Ok(())
    }

    fn score(&self, pair: Pair<'_>) -> Result<Option<f64>, EvaluationError> {
        self.record(format!("score {} {}", pair.benchmark.name, pair.model.name));
        Ok(Some(0.5))
    }

    fn composite(
        &self,
        benchmark: &BenchmarkEntry,
        _models: &[ModelEntry],
    ) -> Result<(), EvaluationError> {
        self.record(format!("composite {}", benchmark.name));
        Ok(())
    }

    fn summarize(
        &self,
        _benchmarks: &[BenchmarkEntry],
        _models: &[ModelEntry],
        scores: &Path,
    ) -> Result<(), EvaluationError> {
        assert!(scores.is_file());
        self.record("summarize".to_owned());
        Ok(())
    }
}

fn models(dir: &Path, names: &[&str]) -> Vec<ModelEntry> {
    names
        .iter()
        .zip(distinct_colors(names.len()))
        .map(|(name, color)| ModelEntry {
            name: name.to_string(),
            path: dir.join("models").join(name),
            color,
            files: Vec::new(),
        })
        .collect()
}

fn benchmarks(dir: &Path, names: &[&str]) -> Vec<BenchmarkEntry> {
    names
        .iter()
        .map(|name| {
            BenchmarkEntry::new(
                format!("Variable/{name}"),
                *name,
                dir.join("build").join(name),
                EvaluatorConfig::Exec {
                    exec: "/bin/true".into(),
                    params: Vec::new(),
                },
            )
        })
        .collect()
}

fn options(dir: &TempDir, clean: bool) -> RunOptions {
    RunOptions {
        build_dir: dir.path().join("build"),
        clean,
    }
}

fn run_single(
    evaluator: &ScriptedEvaluator,
    models: &[ModelEntry],
    benchmarks: &[BenchmarkEntry],
    options: &RunOptions,
) -> Result<RunReport, ExecutorError> {
    let group = LocalGroup::create(1).unwrap();
    let benchmarks = benchmarks.iter().map(BenchmarkEntry::replicate).collect_vec();

    Executor::new(&group[0], evaluator, models, &benchmarks, options).execute()
}

#[test]
pub fn failure_does_not_stop_later_pairs() {
    let dir = TempDir::new().unwrap();
    let models = models(dir.path(), &["a", "b", "c"]);
    let benchmarks = benchmarks(dir.path(), &["GPP"]);
    let options = options(&dir, false);
    let evaluator = ScriptedEvaluator {
        failing: vec!["b".to_owned()],
        ..Default::default()
    };

    let report = run_single(&evaluator, &models, &benchmarks, &options).unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.scored, 2);
    assert_eq!(report.unscored, 1);
    assert_eq!(
        evaluator.calls("confront"),
        vec!["confront GPP a", "confront GPP b", "confront GPP c"]
    );
    // a failed pair has no artifact to score
    assert_eq!(evaluator.calls("score"), vec!["score GPP a", "score GPP c"]);

    let ledger = Ledger::open(&ledger_path(&options.ledger_dir(), 0)).unwrap();
    let outcomes = ledger.outcomes().unwrap();
    assert_eq!(
        outcomes.iter().map(|outcome| outcome.status).collect_vec(),
        vec![PairStatus::Completed, PairStatus::Failed, PairStatus::Completed]
    );
    assert_eq!(
        outcomes[1].failure,
        Some(Failure::new(FailureKind::VarNotInModel, "gpp is missing"))
    );

    let scores = std::fs::read_to_string(options.scores_path()).unwrap();
    assert_eq!(scores, "Model,Variable/GPP\na,0.5\nb,\nc,0.5\n");
}

#[test]
pub fn second_run_uses_cached_results() {
    let dir = TempDir::new().unwrap();
    let models = models(dir.path(), &["a", "b", "c"]);
    let benchmarks = benchmarks(dir.path(), &["GPP", "LAI"]);
    let options = options(&dir, false);

    let first = ScriptedEvaluator::default();
    let report = run_single(&first, &models, &benchmarks, &options).unwrap();
    assert_eq!(report.completed, 6);
    assert_eq!(report.cached, 0);

    let second = ScriptedEvaluator::default();
    let report = run_single(&second, &models, &benchmarks, &options).unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.cached, 6);
    assert!(second.calls("confront").is_empty());
    // cached pairs still take part in the post-processing
    assert_eq!(second.calls("score").len(), 6);

    let ledger = Ledger::open(&ledger_path(&options.ledger_dir(), 0)).unwrap();
    assert!(ledger
        .outcomes()
        .unwrap()
        .iter()
        .all(|outcome| outcome.status == PairStatus::Cached && outcome.runtime.is_none()));
}

#[test]
pub fn clean_run_ignores_cached_results() {
    let dir = TempDir::new().unwrap();
    let models = models(dir.path(), &["a", "b"]);
    let benchmarks = benchmarks(dir.path(), &["GPP"]);

    run_single(
        &ScriptedEvaluator::default(),
        &models,
        &benchmarks,
        &options(&dir, false),
    )
    .unwrap();

    let evaluator = ScriptedEvaluator::default();
    let report = run_single(&evaluator, &models, &benchmarks, &options(&dir, true)).unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.cached, 0);
    assert_eq!(evaluator.calls("confront").len(), 2);
}

#[test]
pub fn every_benchmark_is_composited_once() {
    let dir = TempDir::new().unwrap();
    let models = models(dir.path(), &["a", "b", "c", "d"]);
    let benchmarks = benchmarks(dir.path(), &["GPP", "LAI", "NEE"]);
    let options = options(&dir, false);
    let evaluator = ScriptedEvaluator::default();
    let group = LocalGroup::create(3).unwrap();

    let reports = std::thread::scope(|scope| {
        let handles = group
            .iter()
            .map(|communicator| {
                let (evaluator, models, options) = (&evaluator, &models, &options);
                let benchmarks = benchmarks.iter().map(BenchmarkEntry::replicate).collect_vec();

                scope.spawn(move || {
                    Executor::new(communicator, evaluator, models, &benchmarks, options).execute()
                })
            })
            .collect_vec();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect_vec()
    });

    assert_eq!(reports.iter().map(|report| report.local).sum::<usize>(), 12);
    assert_eq!(evaluator.calls("confront").len(), 12);
    assert_eq!(evaluator.calls("score").len(), 12);
    // limits are idempotent and computed by every worker
    assert_eq!(evaluator.calls("limits").len(), 9);
    assert_eq!(evaluator.calls("summarize").len(), 1);

    for name in ["GPP", "LAI", "NEE"] {
        assert_eq!(evaluator.calls(&format!("composite {name}")).len(), 1);
    }

    // benchmarks vary slower than models, so each worker owns exactly one benchmark
    assert_eq!(reports[0].composited, vec!["Variable/GPP"]);
    assert_eq!(reports[1].composited, vec!["Variable/LAI"]);
    assert_eq!(reports[2].composited, vec!["Variable/NEE"]);

    let scores = std::fs::read_to_string(options.scores_path()).unwrap();
    assert_eq!(scores.lines().count(), 5);
    assert_eq!(
        scores.lines().next(),
        Some("Model,Variable/GPP,Variable/LAI,Variable/NEE")
    );
}

#[test]
pub fn fatal_error_aborts_every_worker() {
    let dir = TempDir::new().unwrap();
    let models = models(dir.path(), &["a", "b"]);
    let benchmarks = benchmarks(dir.path(), &["GPP"]);
    let options = options(&dir, false);
    let evaluator = ScriptedEvaluator {
        broken: Some("b".to_owned()),
        ..Default::default()
    };
    let group = LocalGroup::create(2).unwrap();

    let results = std::thread::scope(|scope| {
        let handles = group
            .iter()
            .map(|communicator| {
                let (evaluator, models, options) = (&evaluator, &models, &options);
                let benchmarks = benchmarks.iter().map(BenchmarkEntry::replicate).collect_vec();

                scope.spawn(move || {
                    Executor::new(communicator, evaluator, models, &benchmarks, options).execute()
                })
            })
            .collect_vec();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect_vec()
    });

    // rank 1 owns model b and breaks, rank 0 learns about it at the next barrier
    assert!(matches!(
        results[1],
        Err(ExecutorError::Evaluation {
            stage: Stage::Confront,
            ..
        })
    ));
    assert!(results[0]
        .as_ref()
        .is_err_and(ExecutorError::is_remote_abort));
    assert!(evaluator.calls("limits").is_empty());
    assert!(!options.scores_path().exists());
}
