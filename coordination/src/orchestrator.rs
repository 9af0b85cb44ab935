//! Orchestrator: runs one complete multi-agent review.
//!
//! ```text
//! validate ─► memo keyspace ─► load memos ─► reviewer pool ─► [cross-check]
//!          ─► arbiter ─► [translate summary] ─► persist memos ─► report
//! ```
//!
//! Every fatal error returns before memos are persisted, so a failed run
//! leaves the memo store untouched.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::arbiter::Arbiter;
use crate::config::RunConfig;
use crate::error::{InvocationError, ReviewError, ReviewOutcome, RunWarning};
use crate::invoker::{AgentInvoker, Translator};
use crate::memo::{MemoKeyspace, MemoLedger, MemoStore};
use crate::pool::{PoolOutcome, ReviewerPool};
use crate::report::SynthesisReport;
use crate::review::ReviewRound;
use crate::runner::{ReviewRequest, RunContext};

pub struct Orchestrator {
    config: RunConfig,
    invoker: Arc<dyn AgentInvoker>,
    store: Arc<dyn MemoStore>,
    translator: Option<Arc<dyn Translator>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: RunConfig, invoker: Arc<dyn AgentInvoker>, store: Arc<dyn MemoStore>) -> Self {
        Self {
            config,
            invoker,
            store,
            translator: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Collaborator used when `output_language` is set.
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the full pipeline for one request.
    pub async fn run(&self, request: ReviewRequest) -> ReviewOutcome<SynthesisReport> {
        let started = Instant::now();

        self.config.validate().map_err(ReviewError::Configuration)?;
        let keyspace = MemoKeyspace::build(self.config.identities())?;

        let names: Vec<&str> = self.config.identities().map(|id| id.name.as_str()).collect();
        let (mut memos, mut warnings) = MemoLedger::load(self.store.as_ref(), &keyspace, names);

        let ctx = RunContext::new(self.invoker.clone(), request)
            .with_cancel(self.cancel.clone())
            .with_run_timeout(self.config.limits.run_timeout())
            .with_agent_timeout(self.config.limits.agent_timeout());

        info!(
            label = %ctx.request.label,
            reviewers = self.config.reviewers.len(),
            arbiter = %self.config.arbiter.identity,
            mode = %self.config.arbiter.mode,
            peer_review = self.config.peer_review,
            "review run starting"
        );

        // ── Reviewers ────────────────────────────────────────────────────
        let pool = ReviewerPool::new(self.config.reviewers.clone())
            .with_max_parallel(self.config.limits.max_parallel);
        let initial = pool.run(&ctx, &memos.snapshot()).await;
        absorb_reviews(&initial, &mut memos, &mut warnings);
        initial.ensure_viable()?;

        let reviews = if self.config.peer_review {
            let (revised, peer_warnings) = pool.cross_check(&ctx, &initial, &memos.snapshot()).await;
            warnings.extend(peer_warnings);
            for r in revised.results.iter().filter(|r| r.round == ReviewRound::CrossCheck) {
                if let Some(update) = &r.memo_update {
                    memos.apply(r.name(), update);
                }
                warnings.extend(r.warnings.iter().map(|message| RunWarning::ParseWarning {
                    agent: r.name().to_string(),
                    message: message.clone(),
                }));
            }
            revised
        } else {
            initial
        };

        // ── Arbiter ──────────────────────────────────────────────────────
        let arbiter = Arbiter::new(self.config.arbiter.clone())
            .with_low_priority(self.config.include_low_priority);
        let outcome = arbiter.run(&ctx, &reviews.results, &mut memos).await?;

        let mut report = SynthesisReport::assemble(
            &ctx.request,
            self.config.arbiter.mode,
            arbiter.identity(),
            &reviews,
            outcome,
            warnings,
        );

        // ── Translation (soft) ───────────────────────────────────────────
        if let Some(language) = self.config.output_language.as_deref() {
            self.translate(&mut report, language, ctx.deadline).await;
        }

        // ── Persist ──────────────────────────────────────────────────────
        let (saved, save_warnings) = memos.persist(self.store.as_ref());
        report.memos_saved = saved;
        report.warnings.extend(save_warnings);

        info!(
            run_id = %report.run_id,
            findings = report.findings.len(),
            warnings = report.warnings.len(),
            rounds_used = report.rounds_used,
            memos_saved = saved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "review run finished"
        );
        Ok(report)
    }

    async fn translate(
        &self,
        report: &mut SynthesisReport,
        language: &str,
        deadline: Option<tokio::time::Instant>,
    ) {
        let Some(translator) = &self.translator else {
            warn!(language, "output language set but no translator configured");
            report.warnings.push(RunWarning::TranslationFailed {
                language: language.to_string(),
                reason: "no translator configured".to_string(),
            });
            return;
        };
        if report.summary.trim().is_empty() {
            return;
        }

        let started = tokio::time::Instant::now();
        let call = translator.translate(&report.summary, language);
        let bounded = async {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, call).await.unwrap_or_else(|_| {
                    Err(InvocationError::TimedOut(at.saturating_duration_since(started)))
                }),
                None => call.await,
            }
        };
        let translated = tokio::select! {
            _ = self.cancel.cancelled() => Err(InvocationError::Cancelled),
            result = bounded => result,
        };
        match translated {
            Ok(text) if !text.trim().is_empty() => {
                report.summary = text;
                report.language = Some(language.to_string());
            }
            Ok(_) => report.warnings.push(RunWarning::TranslationFailed {
                language: language.to_string(),
                reason: "translator returned empty text".to_string(),
            }),
            Err(e) => {
                warn!(language, error = %e, "translation failed; keeping original summary");
                report.warnings.push(RunWarning::TranslationFailed {
                    language: language.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Fold the initial pass into the memo ledger and the warning list.
fn absorb_reviews(pool: &PoolOutcome, memos: &mut MemoLedger, warnings: &mut Vec<RunWarning>) {
    for r in pool.successes() {
        if let Some(update) = &r.memo_update {
            memos.apply(r.name(), update);
        }
    }
    warnings.extend(pool.warnings());
}
