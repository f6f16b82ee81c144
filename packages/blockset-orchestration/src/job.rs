//! Batch planning: how one length is split into independent jobs
//!
//! A length-`r` batch either runs inline or is partitioned by prefix. With
//! prefix size `p`, every ascending `p`-subset of the alphabet is a job whose
//! suffix pool holds the weights above the prefix maximum. Each `r`-subset
//! has exactly one prefix (its `p` smallest weights), so the jobs cover the
//! batch without overlap.

use blockset_core::combinations::{n_choose_k, Combinations};
use blockset_core::{Alphabet, Weight};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of work: every `length`-subset made of `prefix` plus weights
/// drawn from `suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub index: usize,
    pub length: usize,
    /// Ascending
    pub prefix: Vec<Weight>,
    /// Ascending, all greater than `prefix`'s maximum
    pub suffix: Vec<Weight>,
}

impl JobSpec {
    /// File name stem for this job's work files
    pub fn file_stem(&self, batch_id: &str) -> String {
        let prefix = if self.prefix.is_empty() {
            "all".to_string()
        } else {
            join(&self.prefix, "_")
        };
        format!("r{}-{}-{}-{}", self.length, prefix, self.suffix.len(), batch_id)
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} r={} prefix=({}) pool={}",
            self.index,
            self.length,
            join(&self.prefix, ", "),
            self.suffix.len()
        )
    }
}

fn join(weights: &[Weight], sep: &str) -> String {
    weights
        .iter()
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// How a batch will be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// Single pass in the orchestrator process
    Inline(JobSpec),
    /// Worker processes, one per feasible prefix
    Partitioned { prefix_len: usize, jobs: Vec<JobSpec> },
}

impl BatchPlan {
    pub fn jobs(&self) -> &[JobSpec] {
        match self {
            BatchPlan::Inline(job) => std::slice::from_ref(job),
            BatchPlan::Partitioned { jobs, .. } => jobs,
        }
    }
}

/// Smallest `p` in `1..=max(r/2, 1)` with `C(n, p) >= parallelism`; the
/// upper bound when none qualifies.
pub fn prefix_len(n: usize, r: usize, parallelism: usize) -> usize {
    let upper = (r / 2).max(1);
    (1..=upper)
        .find(|&p| n_choose_k(n, p) >= parallelism as u128)
        .unwrap_or(upper)
}

pub fn plan_batch(alphabet: &Alphabet, r: usize, parallelism: usize, cutoff: usize) -> BatchPlan {
    let n = alphabet.len();
    if r <= cutoff || n.saturating_sub(r) <= cutoff || parallelism <= 1 {
        return BatchPlan::Inline(JobSpec {
            index: 0,
            length: r,
            prefix: Vec::new(),
            suffix: alphabet.weights().to_vec(),
        });
    }
    let p = prefix_len(n, r, parallelism);
    BatchPlan::Partitioned {
        prefix_len: p,
        jobs: partition_jobs(alphabet, r, p),
    }
}

/// Feasible jobs for prefix size `p`, in lexicographic prefix order.
pub fn partition_jobs(alphabet: &Alphabet, r: usize, p: usize) -> Vec<JobSpec> {
    let weights = alphabet.weights();
    let mut jobs = Vec::new();
    let mut subsets = Combinations::new(weights.len(), p);
    while let Some(indices) = subsets.next_subset() {
        let prefix: Vec<Weight> = indices.iter().map(|&i| weights[i]).collect();
        let suffix = match prefix.last() {
            Some(&max) => alphabet.above(max).to_vec(),
            None => weights.to_vec(),
        };
        if prefix.len() + suffix.len() < r {
            continue;
        }
        jobs.push(JobSpec {
            index: jobs.len(),
            length: r,
            prefix,
            suffix,
        });
    }
    jobs
}
