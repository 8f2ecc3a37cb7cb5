use super::{isolate, Executor, ExecutorError, RunReport};
use crate::{
    database::Ledger,
    distributed::Communicator,
    evaluation::{Evaluator, Stage},
    scoreboard::Scoreboard,
    work::WorkItem,
};
use tracing::{debug, info};

impl<C: Communicator, E: Evaluator> Executor<'_, C, E> {
    /// Collective post-processing, every worker walks through the same barriers
    pub(super) fn post_process(
        &self,
        local: &[WorkItem],
        ledger: &Ledger,
        report: &mut RunReport,
    ) -> Result<(), ExecutorError> {
        let rank = self.communicator.rank();

        // limits depend on the artifacts of all models, so they can only be computed once every
        // pair was evaluated
        if rank == 0 {
            info!("Determining plot limits");
        }
        for benchmark in self.benchmarks {
            isolate(
                self.evaluator
                    .determine_plot_limits(benchmark, self.models),
                Stage::Limits,
                || benchmark.longname.clone(),
            )?
            .ok();
        }
        self.communicator.barrier()?;

        if rank == 0 {
            info!("Scoring pairs");
        }
        for item in local {
            let pair = item.resolve(self.models, self.benchmarks);
            let model = pair.model.name.as_str();
            let benchmark = pair.benchmark.longname.as_str();

            let score = if pair.benchmark.artifact_path(pair.model).exists() {
                isolate(self.evaluator.score(pair), Stage::Score, || {
                    format!("{benchmark} / {model}")
                })?
                .ok()
                .flatten()
            } else {
                debug!(model, benchmark, "No result to score");

                None
            };

            match score {
                Some(_) => report.scored += 1,
                None => report.unscored += 1,
            }
            ledger.record_score(model, benchmark, score)?;
        }
        self.communicator.barrier()?;

        if rank == 0 {
            info!("Compositing benchmarks");
        }
        // a master might not own a single pair of its benchmark if nothing was assigned to it
        for benchmark in self.benchmarks.iter().filter(|benchmark| benchmark.is_master()) {
            debug!(rank, benchmark = %benchmark.longname, "Compositing as master");

            isolate(
                self.evaluator.composite(benchmark, self.models),
                Stage::Composite,
                || benchmark.longname.clone(),
            )?
            .ok();
            report.composited.push(benchmark.longname.clone());
        }
        self.communicator.barrier()?;

        if rank == 0 {
            let scoreboard = Scoreboard::merge(
                &self.options.ledger_dir(),
                self.communicator.size(),
                self.models,
                self.benchmarks,
            )?;
            let scores = self.options.scores_path();
            scoreboard.write(&scores)?;
            scoreboard.report_failures();

            info!("Writing summary");
            isolate(
                self.evaluator
                    .summarize(self.benchmarks, self.models, &scores),
                Stage::Summarize,
                || "run summary".to_owned(),
            )?
            .ok();
        }
        self.communicator.barrier()?;

        Ok(())
    }
}
