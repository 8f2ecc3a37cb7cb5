use super::{isolate, Executor, ExecutorError, RunReport};
use crate::{
    database::{Ledger, PairOutcome},
    distributed::Communicator,
    evaluation::{Evaluator, Stage},
    work::WorkItem,
};
use std::time::Instant;
use tracing::{debug, info, info_span};

impl<C: Communicator, E: Evaluator> Executor<'_, C, E> {
    /// Evaluate the local pairs one after the other, skipping pairs with an existing artifact
    pub(super) fn evaluate(
        &self,
        local: &[WorkItem],
        ledger: &Ledger,
        report: &mut RunReport,
    ) -> Result<(), ExecutorError> {
        let total = local.len();

        for (index, item) in local.iter().enumerate() {
            let pair = item.resolve(self.models, self.benchmarks);
            let model = pair.model.name.as_str();
            let benchmark = pair.benchmark.longname.as_str();
            let artifact = pair.benchmark.artifact_path(pair.model);

            let _span = info_span!("pair", model, benchmark).entered();

            let outcome = if !self.options.clean && artifact.exists() {
                debug!(artifact = ?artifact, "Using cached result");

                PairOutcome::cached(model, benchmark)
            } else {
                let start = Instant::now();
                let result = isolate(self.evaluator.confront(pair), Stage::Confront, || {
                    format!("{benchmark} / {model}")
                })?;
                let elapsed = start.elapsed();

                match result {
                    Ok(()) => PairOutcome::completed(model, benchmark, elapsed),
                    Err(failure) => PairOutcome::failed(model, benchmark, elapsed, failure),
                }
            };

            info!(
                status = ?outcome.status,
                elapsed = ?outcome.runtime,
                "Done with {}/{total}",
                index + 1
            );

            ledger.record_outcome(&outcome)?;
            report.count(outcome.status);
        }

        Ok(())
    }
}
