//! Allocation engine: picks bank tasks whose spent hours add up to a target.
//!
//! Strategy by target size:
//! - targets up to [`SINGLE_TASK_THRESHOLD`] hours use one task, rewritten to
//!   the target;
//! - larger targets run a randomized greedy search, then an exact
//!   dynamic-programming pass over hundredths of an hour, then a deterministic
//!   fallback that stretches one task to close the gap.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::bank::CandidateTask;
use crate::error::AllocationError;

/// Tolerance used for every hour comparison.
pub const EPSILON: f64 = 1e-9;

/// Targets at or below this many hours are filled by a single task.
pub const SINGLE_TASK_THRESHOLD: f64 = 2.0;

/// A single-task pick may exceed the target by at most this factor.
pub const SINGLE_TASK_SLACK: f64 = 1.5;

pub const MIN_TRIALS: u32 = 2000;
pub const DEFAULT_TRIALS: u32 = 3000;

// Durations are solved exactly on this grid (hundredths of an hour).
const GRID: f64 = 100.0;

// Largest goal, in grid cells, the exact solver builds tables for (10 000 h).
const MAX_EXACT_CELLS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    #[default]
    SingleTask,
    Randomized,
    ExactSolver,
    Fallback,
}

/// Hours rewrite that must be persisted to the task bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAdjustment {
    pub title: String,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Tasks in submission order.
    pub tasks: Vec<CandidateTask>,
    pub strategy: AllocationStrategy,
    /// Set when the fallback stretched a task; the caller persists it.
    pub adjustment: Option<BankAdjustment>,
}

impl Allocation {
    pub fn total_hours(&self) -> f64 {
        self.tasks.iter().map(|t| t.spent_hours).sum()
    }

    pub fn summary(&self) -> AllocationSummary {
        AllocationSummary {
            strategy: self.strategy,
            adjusted: self.adjustment.is_some(),
            total_hours: self.total_hours(),
            tasks: self
                .tasks
                .iter()
                .map(|t| PlannedTask {
                    title: t.title.clone(),
                    spent_hours: t.spent_hours,
                    estimated_hours: t.estimated_hours,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub title: String,
    pub spent_hours: f64,
    pub estimated_hours: f64,
}

/// Serializable view of an allocation, kept on the execution record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub strategy: AllocationStrategy,
    pub adjusted: bool,
    pub total_hours: f64,
    pub tasks: Vec<PlannedTask>,
}

pub struct AllocationEngine {
    trials: u32,
}

impl Default for AllocationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TRIALS)
    }
}

impl AllocationEngine {
    /// Trial counts below [`MIN_TRIALS`] are raised to it.
    pub fn new(trials: u32) -> Self {
        Self {
            trials: trials.max(MIN_TRIALS),
        }
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    pub fn allocate(
        &self,
        candidates: &[CandidateTask],
        target_hours: f64,
    ) -> Result<Allocation, AllocationError> {
        self.allocate_with_rng(candidates, target_hours, &mut rand::thread_rng())
    }

    pub fn allocate_with_rng<R: Rng + ?Sized>(
        &self,
        candidates: &[CandidateTask],
        target_hours: f64,
        rng: &mut R,
    ) -> Result<Allocation, AllocationError> {
        if !target_hours.is_finite() || target_hours <= 0.0 {
            return Err(AllocationError::InvalidTarget(target_hours));
        }

        let pool: Vec<&CandidateTask> = candidates.iter().filter(|t| t.spent_hours > 0.0).collect();
        if pool.is_empty() {
            return Err(AllocationError::NoCandidates);
        }

        if target_hours <= SINGLE_TASK_THRESHOLD {
            return Ok(single_task(&pool, target_hours));
        }

        if let Some(tasks) = randomized_search(&pool, target_hours, self.trials, rng) {
            tracing::debug!(tasks = tasks.len(), target_hours, "randomized search found a combination");
            return Ok(Allocation {
                tasks,
                strategy: AllocationStrategy::Randomized,
                adjustment: None,
            });
        }

        if let Some(tasks) = exact_subset(&pool, target_hours) {
            tracing::debug!(tasks = tasks.len(), target_hours, "exact solver found a combination");
            return Ok(Allocation {
                tasks,
                strategy: AllocationStrategy::ExactSolver,
                adjustment: None,
            });
        }

        Ok(fallback(&pool, target_hours))
    }
}

fn single_task(pool: &[&CandidateTask], target_hours: f64) -> Allocation {
    let chosen = pool
        .iter()
        .find(|t| t.spent_hours <= target_hours * SINGLE_TASK_SLACK)
        .or_else(|| {
            pool.iter()
                .min_by(|a, b| a.spent_hours.total_cmp(&b.spent_hours))
        })
        .copied();

    // The pool is non-empty, so `chosen` is always set.
    Allocation {
        tasks: chosen.map(|t| t.with_hours(target_hours)).into_iter().collect(),
        strategy: AllocationStrategy::SingleTask,
        adjustment: None,
    }
}

fn randomized_search<R: Rng + ?Sized>(
    pool: &[&CandidateTask],
    target_hours: f64,
    trials: u32,
    rng: &mut R,
) -> Option<Vec<CandidateTask>> {
    let mut order = pool.to_vec();
    for _ in 0..trials {
        order.shuffle(rng);
        let mut sum = 0.0;
        let mut chosen = Vec::new();
        for task in &order {
            if sum + task.spent_hours <= target_hours + EPSILON {
                chosen.push(*task);
                sum += task.spent_hours;
                if (sum - target_hours).abs() < EPSILON {
                    return Some(chosen.into_iter().cloned().collect());
                }
            }
        }
    }
    None
}

fn to_grid(hours: f64) -> Option<usize> {
    let scaled = hours * GRID;
    let rounded = scaled.round();
    ((scaled - rounded).abs() < 1e-6 && rounded >= 0.0).then_some(rounded as usize)
}

/// 0/1 subset-sum over hundredths of an hour. Returns `None` when a duration
/// is off the grid or no subset hits the target exactly.
fn exact_subset(pool: &[&CandidateTask], target_hours: f64) -> Option<Vec<CandidateTask>> {
    let goal = to_grid(target_hours)?;
    let weights = pool
        .iter()
        .map(|t| to_grid(t.spent_hours))
        .collect::<Option<Vec<_>>>()?;

    // Goals past what the pool can reach, or too large to tabulate, are skipped.
    let reachable_total = weights
        .iter()
        .filter(|w| **w <= goal)
        .fold(0usize, |acc, w| acc.saturating_add(*w));
    if goal > reachable_total || goal > MAX_EXACT_CELLS {
        return None;
    }

    // parent[s] = (item that first reached sum s, sum before adding it)
    let mut parent: Vec<Option<(usize, usize)>> = vec![None; goal + 1];
    let mut reachable = vec![false; goal + 1];
    reachable[0] = true;

    for (idx, &weight) in weights.iter().enumerate() {
        if weight == 0 || weight > goal {
            continue;
        }
        for sum in (weight..=goal).rev() {
            if !reachable[sum] && reachable[sum - weight] {
                reachable[sum] = true;
                parent[sum] = Some((idx, sum - weight));
            }
        }
    }

    if !reachable[goal] {
        return None;
    }

    let mut picked = Vec::new();
    let mut sum = goal;
    while sum > 0 {
        let (idx, prev) = parent[sum]?;
        picked.push(idx);
        sum = prev;
    }
    picked.sort_unstable();

    Some(picked.into_iter().map(|idx| pool[idx].clone()).collect())
}

fn fallback(pool: &[&CandidateTask], target_hours: f64) -> Allocation {
    let mut sorted = pool.to_vec();
    sorted.sort_by(|a, b| b.spent_hours.total_cmp(&a.spent_hours));

    let mut sum = 0.0;
    let mut chosen: Vec<CandidateTask> = Vec::new();
    for task in sorted {
        if sum + task.spent_hours <= target_hours + EPSILON {
            sum += task.spent_hours;
            chosen.push(task.clone());
        }
    }

    let Some(last) = chosen.last_mut() else {
        // Every task is longer than the target: shrink the smallest one.
        let smallest = pool
            .iter()
            .min_by(|a, b| a.spent_hours.total_cmp(&b.spent_hours))
            .copied();
        let tasks: Vec<CandidateTask> = smallest
            .map(|t| t.with_hours(target_hours))
            .into_iter()
            .collect();
        let adjustment = tasks.first().map(|t| BankAdjustment {
            title: t.title.clone(),
            hours: target_hours,
        });
        tracing::warn!(
            target_hours,
            title = adjustment.as_ref().map(|a| a.title.as_str()).unwrap_or_default(),
            "no combination fits the target, rewriting the smallest task to the full target"
        );
        return Allocation {
            tasks,
            strategy: AllocationStrategy::Fallback,
            adjustment,
        };
    };

    let deficit = target_hours - sum;
    let adjustment = if deficit > EPSILON {
        let stretched = last.spent_hours + deficit;
        tracing::warn!(
            target_hours,
            deficit,
            title = %last.title,
            from = last.spent_hours,
            to = stretched,
            "no exact combination, stretching the last selected task"
        );
        *last = last.with_hours(stretched);
        Some(BankAdjustment {
            title: last.title.clone(),
            hours: stretched,
        })
    } else {
        None
    };

    Allocation {
        tasks: chosen,
        strategy: AllocationStrategy::Fallback,
        adjustment,
    }
}
