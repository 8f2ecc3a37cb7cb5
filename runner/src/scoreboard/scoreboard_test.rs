use crate::{
    benchmark::BenchmarkEntry,
    config::EvaluatorConfig,
    database::{ledger_path, Ledger, PairOutcome, ScoreRecord},
    evaluation::{Failure, FailureKind},
    model::{distinct_colors, ModelEntry},
    scoreboard::Scoreboard,
};
use std::{path::PathBuf, time::Duration};
use tempfile::TempDir;

fn models(names: &[&str]) -> Vec<ModelEntry> {
    names
        .iter()
        .zip(distinct_colors(names.len()))
        .map(|(name, color)| ModelEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            color,
            files: Vec::new(),
        })
        .collect()
}

fn benchmarks(longnames: &[&str]) -> Vec<BenchmarkEntry> {
    longnames
        .iter()
        .map(|longname| {
            BenchmarkEntry::new(
                *longname,
                longname.rsplit('/').next().unwrap(),
                PathBuf::from(longname),
                EvaluatorConfig::Exec {
                    exec: "/bin/true".into(),
                    params: Vec::new(),
                },
            )
        })
        .collect()
}

fn record(model: &str, benchmark: &str, score: Option<f64>) -> ScoreRecord {
    ScoreRecord {
        model: model.to_owned(),
        benchmark: benchmark.to_owned(),
        score,
    }
}

fn csv(scoreboard: &Scoreboard) -> String {
    let mut buffer = Vec::new();
    scoreboard.write_csv(&mut buffer).unwrap();

    String::from_utf8(buffer).unwrap()
}

#[test]
pub fn one_row_per_model() {
    let mut scoreboard = Scoreboard::new(
        &models(&["bcc", "CLM50"]),
        &benchmarks(&["Precipitation/GPCP2", "Gross Primary Productivity/Fluxnet"]),
    );

    scoreboard.insert(record("CLM50", "Precipitation/GPCP2", Some(0.625)));
    scoreboard.insert(record("bcc", "Gross Primary Productivity/Fluxnet", Some(0.5)));
    scoreboard.insert(record("bcc", "Precipitation/GPCP2", None));

    assert_eq!(
        csv(&scoreboard),
        "Model,Precipitation/GPCP2,Gross Primary Productivity/Fluxnet\n\
         bcc,,0.5\n\
         CLM50,0.625,\n"
    );
    assert_eq!(scoreboard.get("CLM50", "Precipitation/GPCP2"), Some(0.625));
    assert_eq!(scoreboard.get("bcc", "Precipitation/GPCP2"), None);
}

#[test]
pub fn merges_ledgers_of_all_ranks() {
    let dir = TempDir::new().unwrap();
    let models = models(&["bcc", "CLM50"]);
    let benchmarks = benchmarks(&["Precipitation/GPCP2"]);

    for (rank, model, score) in [(0, "bcc", 0.25), (1, "CLM50", 0.75)] {
        let ledger = Ledger::create(&ledger_path(dir.path(), rank)).unwrap();
        ledger
            .record_score(model, "Precipitation/GPCP2", Some(score))
            .unwrap();
        ledger.close().unwrap();
    }
    // a rank without local work still leaves an empty ledger behind
    Ledger::create(&ledger_path(dir.path(), 2))
        .unwrap()
        .close()
        .unwrap();

    let scoreboard = Scoreboard::merge(dir.path(), 3, &models, &benchmarks).unwrap();
    let path = dir.path().join("scores.csv");
    scoreboard.write(&path).unwrap();

    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "Model,Precipitation/GPCP2\nbcc,0.25\nCLM50,0.75\n"
    );
}

#[test]
pub fn collects_failed_pairs_of_all_ranks() {
    let dir = TempDir::new().unwrap();
    let models = models(&["bcc", "CLM50"]);
    let benchmarks = benchmarks(&["Precipitation/GPCP2"]);
    let failure = Failure::new(FailureKind::VarNotInModel, "pr is missing");

    let ledger = Ledger::create(&ledger_path(dir.path(), 0)).unwrap();
    ledger
        .record_outcome(&PairOutcome::completed(
            "bcc",
            "Precipitation/GPCP2",
            Duration::from_millis(40),
        ))
        .unwrap();
    ledger.close().unwrap();

    let ledger = Ledger::create(&ledger_path(dir.path(), 1)).unwrap();
    ledger
        .record_outcome(&PairOutcome::failed(
            "CLM50",
            "Precipitation/GPCP2",
            Duration::from_millis(3),
            failure.clone(),
        ))
        .unwrap();
    ledger
        .record_score("CLM50", "Precipitation/GPCP2", None)
        .unwrap();
    ledger.close().unwrap();

    let scoreboard = Scoreboard::merge(dir.path(), 2, &models, &benchmarks).unwrap();

    assert_eq!(scoreboard.failures().len(), 1);
    assert_eq!(scoreboard.failures()[0].model, "CLM50");
    assert_eq!(scoreboard.failures()[0].failure, Some(failure));
    assert_eq!(scoreboard.get("CLM50", "Precipitation/GPCP2"), None);
}
