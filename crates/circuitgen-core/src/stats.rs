//! Stats aggregation for production batches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::BatchReport;
use crate::types::{CandidateMetrics, GenerationStats};

/// Per-model summary of one production batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub model: String,
    pub total_programs: usize,
    pub valid_programs: usize,
    pub total_time_secs: f64,
    /// Zero when no program was valid.
    pub avg_time_per_valid_secs: f64,
    /// Mean over candidates that reported a score.
    pub avg_quality_score: f64,
    pub total_cost: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub avg_tokens_per_candidate: f64,
}

impl BatchSummary {
    /// Fold candidate stats into a summary.
    ///
    /// `total_programs` is the configured batch size. Token averages cover
    /// only the candidates whose stats were supplied.
    pub fn from_stats<'a, I>(
        model: &str,
        total_programs: usize,
        stats: I,
        valid_programs: usize,
        elapsed: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = &'a GenerationStats>,
    {
        let mut total_cost = 0.0;
        let mut prompt_tokens = 0u64;
        let mut completion_tokens = 0u64;
        let mut total_tokens = 0u64;
        let mut scores = Vec::new();
        let mut folded = 0usize;

        for s in stats {
            folded += 1;
            total_cost += s.cost;
            prompt_tokens += s.prompt_tokens;
            completion_tokens += s.completion_tokens;
            total_tokens += s.total_tokens;
            if let Some(score) = s.quality_score {
                scores.push(score);
            }
        }

        let total_time_secs = elapsed.as_secs_f64();
        Self {
            model: model.to_string(),
            total_programs,
            valid_programs,
            total_time_secs,
            avg_time_per_valid_secs: ratio(total_time_secs, valid_programs),
            avg_quality_score: ratio(scores.iter().sum(), scores.len()),
            total_cost,
            total_prompt_tokens: prompt_tokens,
            total_completion_tokens: completion_tokens,
            total_tokens,
            avg_tokens_per_candidate: ratio(total_tokens as f64, folded),
        }
    }

    pub fn from_batch(model: &str, total_programs: usize, batch: &BatchReport) -> Self {
        Self::from_stats(
            model,
            total_programs,
            batch.outcomes.iter().map(|o| &o.stats),
            batch.success_count(),
            batch.elapsed,
        )
    }

    pub fn is_productive(&self) -> bool {
        self.valid_programs > 0
    }

    /// Human-readable block written to the run log.
    pub fn render(&self) -> String {
        format!(
            "\n--- Performance Summary: {} ---\n\
             Total Programs Requested: {}\n\
             Total Valid Programs: {}\n\
             Total Time: {:.2}s\n\
             Average Time per Valid Program: {:.2}s\n\
             Average Quality Score: {:.3}\n\
             Total Cost: ${:.6}\n\
             Total Tokens (In/Out/Total): {}/{}/{}\n\
             Average Tokens per Candidate: {:.1}\n\
             ------------------------------",
            self.model,
            self.total_programs,
            self.valid_programs,
            self.total_time_secs,
            self.avg_time_per_valid_secs,
            self.avg_quality_score,
            self.total_cost,
            self.total_prompt_tokens,
            self.total_completion_tokens,
            self.total_tokens,
            self.avg_tokens_per_candidate,
        )
    }
}

fn ratio(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Checker metrics of one successful production program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexityRecord {
    pub model: String,
    pub file: String,
    pub metrics: CandidateMetrics,
}

impl ComplexityRecord {
    /// Records for every successful candidate of a batch.
    pub fn collect(model: &str, batch: &BatchReport) -> Vec<Self> {
        batch
            .succeeded()
            .map(|o| Self {
                model: model.to_string(),
                file: o.task.filename.clone(),
                metrics: o.stats.metrics.clone(),
            })
            .collect()
    }
}
