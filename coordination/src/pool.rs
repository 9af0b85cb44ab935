//! Reviewer pool: JoinSet fan-out/fan-in over every configured reviewer.
//!
//! ```text
//! Initial pass (fan-out)
//!   JoinSet::spawn(invoke(reviewer_i, prompt_i)) × N
//!
//! Barrier (fan-in)
//!   join_next() until every task settles → one ReviewResult per reviewer
//!
//! Optional cross-check pass
//!   each successful reviewer sees the others' reviews and revises its own
//! ```
//!
//! ## Partial failure policy
//!
//! A reviewer whose invocation fails, times out, is cancelled or panics gets
//! a failed `ReviewResult`; the pool itself never fails. The orchestrator
//! aborts only when no reviewer succeeded (`ensure_viable`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ReviewError, ReviewOutcome, RunWarning};
use crate::identity::AgentIdentity;
use crate::memo::Memo;
use crate::prompts;
use crate::review::{ReviewResult, ReviewRound};
use crate::runner::RunContext;

// ── PoolOutcome ──────────────────────────────────────────────────────────────

/// Every reviewer's result, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct PoolOutcome {
    pub results: Vec<ReviewResult>,
}

impl PoolOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = &ReviewResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReviewResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn get(&self, name: &str) -> Option<&ReviewResult> {
        self.results.iter().find(|r| r.name() == name)
    }

    /// Fail when not a single reviewer produced a usable review.
    pub fn ensure_viable(&self) -> ReviewOutcome<()> {
        if self.success_count() == 0 {
            return Err(ReviewError::AllReviewersFailed {
                failed: self.results.len(),
            });
        }
        Ok(())
    }

    /// Soft failures worth surfacing in the report.
    pub fn warnings(&self) -> Vec<RunWarning> {
        let mut out = Vec::new();
        for r in &self.results {
            if let Some(reason) = r.failure_reason() {
                out.push(RunWarning::ReviewerFailed {
                    reviewer: r.name().to_string(),
                    reason: format!("{} review: {reason}", r.round),
                });
            }
            for message in &r.warnings {
                out.push(RunWarning::ParseWarning {
                    agent: r.name().to_string(),
                    message: message.clone(),
                });
            }
        }
        out
    }
}

// ── ReviewerPool ─────────────────────────────────────────────────────────────

struct Job {
    identity: AgentIdentity,
    prompt: String,
}

/// Runs the configured reviewers concurrently.
#[derive(Debug, Clone)]
pub struct ReviewerPool {
    reviewers: Vec<AgentIdentity>,
    /// Cap on concurrently running reviewers (`None` = all at once).
    max_parallel: Option<usize>,
}

impl ReviewerPool {
    pub fn new(reviewers: Vec<AgentIdentity>) -> Self {
        Self {
            reviewers,
            max_parallel: None,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.map(|n| n.max(1));
        self
    }

    pub fn reviewers(&self) -> &[AgentIdentity] {
        &self.reviewers
    }

    /// Independent first review by every reviewer, each seeded with its own memo.
    pub async fn run(&self, ctx: &RunContext, memos: &HashMap<String, Memo>) -> PoolOutcome {
        info!(reviewers = self.reviewers.len(), "starting independent reviews");

        let jobs = self
            .reviewers
            .iter()
            .map(|identity| Job {
                prompt: prompts::reviewer_initial(identity, &ctx.request, memos.get(&identity.name)),
                identity: identity.clone(),
            })
            .collect();

        PoolOutcome {
            results: self.fan_out(ctx, jobs, ReviewRound::Initial).await,
        }
    }

    /// Cross-check pass over the successful reviewers of `initial`.
    ///
    /// A reviewer whose cross-check fails keeps its initial result; the
    /// failure is returned as a warning.
    pub async fn cross_check(
        &self,
        ctx: &RunContext,
        initial: &PoolOutcome,
        memos: &HashMap<String, Memo>,
    ) -> (PoolOutcome, Vec<RunWarning>) {
        let successes: Vec<&ReviewResult> = initial.successes().collect();
        if successes.len() < 2 {
            debug!("fewer than two successful reviews; skipping cross-check");
            return (initial.clone(), Vec::new());
        }
        info!(reviewers = successes.len(), "starting reviewer cross-check");

        let jobs = successes
            .iter()
            .map(|own| {
                let others: Vec<&ReviewResult> = successes
                    .iter()
                    .copied()
                    .filter(|r| r.name() != own.name())
                    .collect();
                Job {
                    prompt: prompts::reviewer_cross_check(
                        &own.identity,
                        &ctx.request,
                        own,
                        &others,
                        memos.get(own.name()),
                    ),
                    identity: own.identity.clone(),
                }
            })
            .collect();

        let revised = self.fan_out(ctx, jobs, ReviewRound::CrossCheck).await;

        let mut warnings = Vec::new();
        let mut by_name: HashMap<String, ReviewResult> = HashMap::new();
        for result in revised {
            if let Some(reason) = result.failure_reason() {
                warn!(reviewer = %result.name(), error = %reason, "cross-check failed; keeping initial review");
                warnings.push(RunWarning::ReviewerFailed {
                    reviewer: result.name().to_string(),
                    reason: format!("cross_check review: {reason}; initial review kept"),
                });
            } else {
                by_name.insert(result.name().to_string(), result);
            }
        }

        let results = initial
            .results
            .iter()
            .map(|r| by_name.remove(r.name()).unwrap_or_else(|| r.clone()))
            .collect();

        (PoolOutcome { results }, warnings)
    }

    /// Spawn one task per job and wait for all of them.
    ///
    /// The returned vector is in job order and always has one entry per job.
    async fn fan_out(&self, ctx: &RunContext, jobs: Vec<Job>, round: ReviewRound) -> Vec<ReviewResult> {
        let sem = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let mut join_set: JoinSet<(usize, ReviewResult)> = JoinSet::new();
        let identities: Vec<AgentIdentity> = jobs.iter().map(|j| j.identity.clone()).collect();

        for (slot, job) in jobs.into_iter().enumerate() {
            let ctx = ctx.clone();
            let sem = sem.clone();

            join_set.spawn(async move {
                let _permit = match sem {
                    Some(sem) => match sem.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            let failed = ReviewResult::failed(
                                job.identity,
                                round,
                                "concurrency limiter closed",
                                Duration::ZERO,
                            );
                            return (slot, failed);
                        }
                    },
                    None => None,
                };

                let start = Instant::now();
                let result = match ctx.call(&job.identity, &job.prompt).await {
                    Ok(raw) => ReviewResult::from_output(job.identity, round, &raw, start.elapsed()),
                    Err(e) => ReviewResult::failed(job.identity, round, e.to_string(), start.elapsed()),
                };
                (slot, result)
            });
        }

        let mut slots: Vec<Option<ReviewResult>> = vec![None; identities.len()];
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((slot, result)) => {
                    match result.failure_reason() {
                        None => info!(
                            reviewer = %result.name(),
                            %round,
                            findings = result.findings.len(),
                            elapsed_ms = result.elapsed.as_millis() as u64,
                            "review finished"
                        ),
                        Some(reason) => warn!(
                            reviewer = %result.name(),
                            %round,
                            error = %reason,
                            "review failed"
                        ),
                    }
                    slots[slot] = Some(result);
                }
                Err(e) => {
                    warn!(error = %e, "review task panicked");
                }
            }
        }

        identities
            .into_iter()
            .zip(slots)
            .map(|(identity, slot)| {
                slot.unwrap_or_else(|| {
                    ReviewResult::failed(identity, round, "review task panicked", Duration::ZERO)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;
    use crate::identity::BackendFamily;
    use crate::invoker::AgentInvoker;
    use crate::runner::ReviewRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies per agent name; names listed in `failing` error out, names in
    /// `panicking` panic. Records every prompt it receives.
    #[derive(Default)]
    struct ScriptedInvoker {
        replies: HashMap<String, String>,
        failing: Vec<String>,
        panicking: Vec<String>,
        prompts: Mutex<Vec<(String, String)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            identity: &AgentIdentity,
            prompt: &str,
            _context: &str,
        ) -> Result<String, InvocationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.prompts
                .lock()
                .unwrap()
                .push((identity.name.clone(), prompt.to_string()));
            if self.panicking.contains(&identity.name) {
                panic!("backend blew up");
            }
            if self.failing.contains(&identity.name) {
                return Err(InvocationError::Backend("unavailable".into()));
            }
            Ok(self
                .replies
                .get(&identity.name)
                .cloned()
                .unwrap_or_else(|| format!("[P2] note from {}", identity.name)))
        }
    }

    fn ids(names: &[&str]) -> Vec<AgentIdentity> {
        names
            .iter()
            .map(|n| AgentIdentity::new(*n, BackendFamily::Custom, "m"))
            .collect()
    }

    fn ctx(invoker: Arc<ScriptedInvoker>) -> RunContext {
        RunContext::new(invoker, ReviewRequest::new("review it", "the diff"))
    }

    #[tokio::test]
    async fn output_count_matches_configured_reviewers() {
        let invoker = Arc::new(ScriptedInvoker {
            failing: vec!["B".into()],
            panicking: vec!["C".into()],
            ..Default::default()
        });
        let pool = ReviewerPool::new(ids(&["A", "B", "C", "D"]));
        let out = pool.run(&ctx(invoker), &HashMap::new()).await;

        assert_eq!(out.len(), 4);
        let names: Vec<&str> = out.results.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
        assert_eq!(out.success_count(), 2);
        assert!(out.get("B").unwrap().failure_reason().unwrap().contains("unavailable"));
        assert!(out.get("C").unwrap().failure_reason().unwrap().contains("panicked"));
        assert!(out.ensure_viable().is_ok());
        assert_eq!(out.warnings().len(), 2);
    }

    #[tokio::test]
    async fn all_failed_is_not_viable() {
        let invoker = Arc::new(ScriptedInvoker {
            failing: vec!["A".into(), "B".into()],
            ..Default::default()
        });
        let out = ReviewerPool::new(ids(&["A", "B"]))
            .run(&ctx(invoker), &HashMap::new())
            .await;
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out.ensure_viable(),
            Err(ReviewError::AllReviewersFailed { failed: 2 })
        ));
    }

    #[tokio::test]
    async fn each_prompt_carries_only_its_own_memo() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let mut memos = HashMap::new();
        memos.insert("A".to_string(), Memo::new("memo-of-A"));
        memos.insert("B".to_string(), Memo::new("memo-of-B"));

        ReviewerPool::new(ids(&["A", "B"]))
            .run(&ctx(invoker.clone()), &memos)
            .await;

        for (name, prompt) in invoker.prompts.lock().unwrap().iter() {
            let other = if name == "A" { "memo-of-B" } else { "memo-of-A" };
            assert!(prompt.contains(&format!("memo-of-{name}")));
            assert!(!prompt.contains(other));
            assert!(prompt.contains("review it"));
            assert!(prompt.contains("the diff"));
        }
    }

    #[tokio::test]
    async fn max_parallel_limits_concurrency() {
        let invoker = Arc::new(ScriptedInvoker::default());
        ReviewerPool::new(ids(&["A", "B", "C", "D"]))
            .with_max_parallel(Some(1))
            .run(&ctx(invoker.clone()), &HashMap::new())
            .await;
        assert_eq!(invoker.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cross_check_replaces_successes_and_keeps_failures() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let pool = ReviewerPool::new(ids(&["A", "B", "C"]));
        let initial = PoolOutcome {
            results: vec![
                ReviewResult::from_output(ids(&["A"]).remove(0), ReviewRound::Initial, "[P1] a", Duration::ZERO),
                ReviewResult::failed(ids(&["B"]).remove(0), ReviewRound::Initial, "down", Duration::ZERO),
                ReviewResult::from_output(ids(&["C"]).remove(0), ReviewRound::Initial, "[P0] c", Duration::ZERO),
            ],
        };

        let (revised, warnings) = pool.cross_check(&ctx(invoker.clone()), &initial, &HashMap::new()).await;
        assert!(warnings.is_empty());
        assert_eq!(revised.len(), 3);
        assert_eq!(revised.results[0].round, ReviewRound::CrossCheck);
        assert_eq!(revised.results[1].round, ReviewRound::Initial);
        assert!(!revised.results[1].is_success());
        assert_eq!(revised.results[2].round, ReviewRound::CrossCheck);

        // A sees C's review but not its own as "other".
        let prompts = invoker.prompts.lock().unwrap();
        let (_, a_prompt) = prompts.iter().find(|(n, _)| n == "A").unwrap();
        assert!(a_prompt.contains("<REVIEW name=\"C\">"));
        assert!(!a_prompt.contains("<REVIEW name=\"A\">"));
    }

    #[tokio::test]
    async fn failed_cross_check_keeps_initial_review() {
        let invoker = Arc::new(ScriptedInvoker {
            failing: vec!["A".into()],
            ..Default::default()
        });
        let pool = ReviewerPool::new(ids(&["A", "B"]));
        let initial = PoolOutcome {
            results: vec![
                ReviewResult::from_output(ids(&["A"]).remove(0), ReviewRound::Initial, "[P1] a", Duration::ZERO),
                ReviewResult::from_output(ids(&["B"]).remove(0), ReviewRound::Initial, "[P1] b", Duration::ZERO),
            ],
        };
        let (revised, warnings) = pool.cross_check(&ctx(invoker), &initial, &HashMap::new()).await;
        assert_eq!(warnings.len(), 1);
        assert!(revised.results[0].is_success());
        assert_eq!(revised.results[0].round, ReviewRound::Initial);
        assert_eq!(revised.results[1].round, ReviewRound::CrossCheck);
    }
}
