//! Arbiter driver: runs the bounded collect/query/answer loop.
//!
//! ```text
//! INITIAL ─► COLLECTING ─┬─► QUERYING ─► ANSWERING ─► COLLECTING ─► …
//!                        └─► SYNTHESIZING ─► DONE
//! ```
//!
//! Single mode invokes the arbiter exactly once: the COLLECTING prompt asks
//! for the final review and its output is the synthesis. Multi mode loops
//! until the arbiter has no questions, every request is dropped, or the
//! budget is spent, then makes one SYNTHESIZING call.
//!
//! Any arbiter invocation failure moves the session to FAILED and aborts the
//! run. Reviewer failures while answering are soft.

use std::collections::HashMap;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::state::{ArbiterPhase, ArbiterSession, PhaseTransition};
use super::QaExchange;
use crate::config::{ArbiterConfig, ArbiterMode};
use crate::error::{ReviewError, ReviewOutcome, RunWarning};
use crate::identity::AgentIdentity;
use crate::memo::{Memo, MemoLedger, MemoUpdate};
use crate::prompts::{self, ArbiterPromptInput, ArbiterTask, BudgetView};
use crate::protocol::{parse_agent_output, ArbiterDirective, ParsedOutput, QueryRequest};
use crate::review::ReviewResult;
use crate::runner::RunContext;

/// Everything the arbiter produced.
#[derive(Debug, Clone)]
pub struct ArbiterOutcome {
    /// Parsed output of the synthesizing call (directive stripped).
    pub synthesis: ParsedOutput,
    /// Every clarification exchange, in the order asked.
    pub qa: Vec<QaExchange>,
    pub transitions: Vec<PhaseTransition>,
    pub rounds_used: u32,
    pub queries_issued: u32,
    pub warnings: Vec<RunWarning>,
}

/// A vetted question, bound to the reviewer result it targets.
struct PendingQuery<'a> {
    index: usize,
    review: &'a ReviewResult,
    question: String,
}

/// One reviewer's reply to one question.
struct Answer {
    index: usize,
    exchange: QaExchange,
    memo_update: Option<MemoUpdate>,
    parse_warnings: Vec<String>,
}

/// Mutable loop state threaded through the phases.
struct Progress {
    session: ArbiterSession,
    qa: Vec<QaExchange>,
    warnings: Vec<RunWarning>,
    queries_issued: u32,
}

pub struct Arbiter {
    config: ArbiterConfig,
    include_low_priority: bool,
}

impl Arbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            include_low_priority: false,
        }
    }

    pub fn with_low_priority(mut self, include: bool) -> Self {
        self.include_low_priority = include;
        self
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.config.identity
    }

    /// Drive the session from INITIAL to DONE.
    ///
    /// `reviews` holds every reviewer's result, failed ones included; only
    /// successful reviews are shown to the arbiter or accept questions.
    /// Memo updates from the arbiter and from answering reviewers are applied
    /// to `memos` as they arrive.
    pub async fn run(
        &self,
        ctx: &RunContext,
        reviews: &[ReviewResult],
        memos: &mut MemoLedger,
    ) -> ReviewOutcome<ArbiterOutcome> {
        let mut progress = Progress {
            session: ArbiterSession::new(self.config.mode, self.config.max_rounds),
            qa: Vec::new(),
            warnings: Vec::new(),
            queries_issued: 0,
        };
        let successes: Vec<&ReviewResult> = reviews.iter().filter(|r| r.is_success()).collect();
        info!(
            arbiter = %self.config.identity,
            mode = %self.config.mode,
            reviews = successes.len(),
            "arbiter starting"
        );

        self.advance(&mut progress.session, ArbiterPhase::Collecting, "reviews received")?;

        let synthesis = loop {
            let task = match self.config.mode {
                ArbiterMode::Single => ArbiterTask::Synthesize,
                ArbiterMode::Multi => ArbiterTask::Collect,
            };
            let prompt = self.prompt(ctx, &successes, &progress, memos, task);
            let raw = self.invoke(ctx, &mut progress.session, &prompt).await?;
            let mut parsed = parse_agent_output(&raw);
            self.absorb(&mut parsed, memos, &mut progress.warnings);

            if self.config.mode == ArbiterMode::Single {
                if let Some(ArbiterDirective::Ask(requests)) = parsed.directive.take() {
                    warn!(count = requests.len(), "single-mode arbiter asked questions; dropping them");
                    for req in requests {
                        progress.warnings.push(RunWarning::QueryDropped {
                            target: req.target,
                            reason: "single arbiter mode never queries".to_string(),
                        });
                    }
                }
                self.advance(
                    &mut progress.session,
                    ArbiterPhase::Synthesizing,
                    "single mode: collect output is the synthesis",
                )?;
                break parsed;
            }

            let requests = match parsed.directive.take() {
                Some(ArbiterDirective::Ask(requests)) if !requests.is_empty() => requests,
                _ => {
                    self.advance(&mut progress.session, ArbiterPhase::Synthesizing, "arbiter has no questions")?;
                    break self.synthesize(ctx, &successes, &mut progress, memos).await?;
                }
            };

            if !progress.session.has_rounds_remaining()
                || progress.queries_issued >= self.config.max_queries
            {
                warn!(
                    pending = requests.len(),
                    rounds_used = progress.session.rounds_used,
                    queries_issued = progress.queries_issued,
                    "clarification budget exhausted; discarding pending questions"
                );
                progress.warnings.push(RunWarning::BudgetExhausted {
                    pending: requests.len(),
                });
                self.advance(&mut progress.session, ArbiterPhase::Synthesizing, "budget exhausted")?;
                break self.synthesize(ctx, &successes, &mut progress, memos).await?;
            }

            let accepted = self.vet(requests, reviews, &mut progress);
            if accepted.is_empty() {
                self.advance(&mut progress.session, ArbiterPhase::Synthesizing, "every request was dropped")?;
                break self.synthesize(ctx, &successes, &mut progress, memos).await?;
            }

            let reason = format!("{} question(s)", accepted.len());
            self.advance(&mut progress.session, ArbiterPhase::Querying, &reason)?;
            let round = progress.session.rounds_used;
            let answers = dispatch(ctx, round, accepted, &progress.qa, memos).await;

            self.advance(&mut progress.session, ArbiterPhase::Answering, "answers received")?;
            for answer in answers {
                let target = answer.exchange.target.clone();
                if answer.exchange.failed {
                    progress.warnings.push(RunWarning::QueryFailed {
                        target: target.clone(),
                        reason: answer.exchange.answer.clone(),
                    });
                }
                if let Some(update) = &answer.memo_update {
                    memos.apply(&target, update);
                }
                progress
                    .warnings
                    .extend(answer.parse_warnings.into_iter().map(|message| RunWarning::ParseWarning {
                        agent: target.clone(),
                        message,
                    }));
                progress.qa.push(answer.exchange);
            }
            self.advance(&mut progress.session, ArbiterPhase::Collecting, "answers folded into history")?;
        };

        self.advance(&mut progress.session, ArbiterPhase::Done, "synthesis produced")?;
        info!(
            rounds_used = progress.session.rounds_used,
            queries_issued = progress.queries_issued,
            findings = synthesis.findings.len(),
            "arbiter finished"
        );

        Ok(ArbiterOutcome {
            synthesis,
            qa: progress.qa,
            rounds_used: progress.session.rounds_used,
            transitions: progress.session.transitions,
            queries_issued: progress.queries_issued,
            warnings: progress.warnings,
        })
    }

    /// Final SYNTHESIZING call. Any directive in its output is ignored.
    async fn synthesize(
        &self,
        ctx: &RunContext,
        successes: &[&ReviewResult],
        progress: &mut Progress,
        memos: &mut MemoLedger,
    ) -> ReviewOutcome<ParsedOutput> {
        let prompt = self.prompt(ctx, successes, progress, memos, ArbiterTask::Synthesize);
        let raw = self.invoke(ctx, &mut progress.session, &prompt).await?;
        let mut parsed = parse_agent_output(&raw);
        self.absorb(&mut parsed, memos, &mut progress.warnings);
        if parsed.directive.take().is_some() {
            debug!("ignoring control directive in synthesis output");
        }
        Ok(parsed)
    }

    fn prompt(
        &self,
        ctx: &RunContext,
        successes: &[&ReviewResult],
        progress: &Progress,
        memos: &MemoLedger,
        task: ArbiterTask,
    ) -> String {
        prompts::arbiter(
            &ArbiterPromptInput {
                arbiter: &self.config.identity,
                request: &ctx.request,
                reviews: successes,
                qa: &progress.qa,
                budget: BudgetView {
                    rounds_used: progress.session.rounds_used,
                    max_rounds: self.config.max_rounds,
                    queries_used: progress.queries_issued,
                    max_queries: self.config.max_queries,
                },
                include_low_priority: self.include_low_priority,
                memo: memos.memo_for(&self.config.identity.name),
            },
            task,
        )
    }

    /// Invoke the arbiter; a failure is fatal and ends the session in FAILED.
    async fn invoke(
        &self,
        ctx: &RunContext,
        session: &mut ArbiterSession,
        prompt: &str,
    ) -> ReviewOutcome<String> {
        match ctx.call(&self.config.identity, prompt).await {
            Ok(raw) => Ok(raw),
            Err(e) => {
                let phase = session.phase;
                let reason = e.to_string();
                error!(arbiter = %self.config.identity, %phase, error = %reason, "arbiter invocation failed");
                session.transition(ArbiterPhase::Failed, &reason)?;
                Err(ReviewError::ArbiterFailed { phase, reason })
            }
        }
    }

    /// Apply the arbiter's own memo update and collect its parse warnings.
    fn absorb(&self, parsed: &mut ParsedOutput, memos: &mut MemoLedger, warnings: &mut Vec<RunWarning>) {
        let name = &self.config.identity.name;
        if let Some(update) = parsed.memo_update.take() {
            memos.apply(name, &update);
        }
        warnings.extend(parsed.warnings.drain(..).map(|message| RunWarning::ParseWarning {
            agent: name.clone(),
            message,
        }));
    }

    fn advance(&self, session: &mut ArbiterSession, to: ArbiterPhase, reason: &str) -> ReviewOutcome<()> {
        session.transition(to, reason)?;
        info!(status = %session.status_line(), reason, "arbiter phase");
        Ok(())
    }

    /// Resolve targets and enforce the question budget.
    ///
    /// Dropped requests become warnings; accepted ones count against
    /// `max_queries` immediately.
    fn vet<'a>(
        &self,
        requests: Vec<QueryRequest>,
        reviews: &'a [ReviewResult],
        progress: &mut Progress,
    ) -> Vec<PendingQuery<'a>> {
        let mut accepted = Vec::new();

        for req in requests {
            let question = req.question.trim();
            let drop_reason = match resolve_target(&req.target, reviews) {
                _ if question.is_empty() => Some("empty question"),
                None => Some("unknown reviewer"),
                Some(r) if !r.is_success() => Some("reviewer has no successful review"),
                Some(_) if progress.queries_issued >= self.config.max_queries => {
                    Some("query budget exhausted")
                }
                Some(review) => {
                    progress.queries_issued += 1;
                    accepted.push(PendingQuery {
                        index: accepted.len(),
                        review,
                        question: question.to_string(),
                    });
                    None
                }
            };

            if let Some(reason) = drop_reason {
                warn!(reviewer = %req.target, reason, "dropping clarification query");
                progress.warnings.push(RunWarning::QueryDropped {
                    target: req.target,
                    reason: reason.to_string(),
                });
            }
        }

        accepted
    }
}

/// Exact name first, then a case-insensitive match.
fn resolve_target<'a>(target: &str, reviews: &'a [ReviewResult]) -> Option<&'a ReviewResult> {
    let target = target.trim();
    reviews
        .iter()
        .find(|r| r.name() == target)
        .or_else(|| reviews.iter().find(|r| r.name().eq_ignore_ascii_case(target)))
}

/// Send every accepted question: one task per target, questions to the same
/// target in order. Returns answers in request order.
async fn dispatch(
    ctx: &RunContext,
    round: u32,
    accepted: Vec<PendingQuery<'_>>,
    history: &[QaExchange],
    memos: &MemoLedger,
) -> Vec<Answer> {
    let total = accepted.len();
    let mut fallback: Vec<(String, String)> = Vec::with_capacity(total);
    let mut groups: Vec<(ReviewResult, Vec<(usize, String)>)> = Vec::new();
    let mut group_of: HashMap<String, usize> = HashMap::new();

    for q in accepted {
        fallback.push((q.review.name().to_string(), q.question.clone()));
        let slot = *group_of.entry(q.review.name().to_string()).or_insert_with(|| {
            groups.push((q.review.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push((q.index, q.question));
    }

    info!(round, questions = total, reviewers = groups.len(), "sending clarification queries");

    let mut join_set: JoinSet<Vec<Answer>> = JoinSet::new();
    for (own, questions) in groups {
        let ctx = ctx.clone();
        let mut local_history: Vec<QaExchange> = history
            .iter()
            .filter(|qa| qa.target == own.name())
            .cloned()
            .collect();
        let mut memo: Option<Memo> = memos.memo_for(own.name()).cloned();

        join_set.spawn(async move {
            let mut answers = Vec::with_capacity(questions.len());
            for (index, question) in questions {
                let snippet = prompts::qa_snippet_for(own.name(), &local_history);
                let prompt = prompts::reviewer_followup(
                    &own.identity,
                    &ctx.request,
                    &own,
                    &question,
                    &snippet,
                    memo.as_ref(),
                );

                let answer = match ctx.call(&own.identity, &prompt).await {
                    Ok(raw) => {
                        let parsed = parse_agent_output(&raw);
                        if let Some(update) = &parsed.memo_update {
                            memo = Some(update.apply(memo.as_ref()));
                        }
                        Answer {
                            index,
                            exchange: QaExchange::answered(round, own.name(), &question, parsed.cleaned),
                            memo_update: parsed.memo_update,
                            parse_warnings: parsed.warnings,
                        }
                    }
                    Err(e) => {
                        warn!(reviewer = %own.name(), error = %e, "clarification query failed");
                        Answer {
                            index,
                            exchange: QaExchange::failed(round, own.name(), &question, &e.to_string()),
                            memo_update: None,
                            parse_warnings: Vec::new(),
                        }
                    }
                };
                local_history.push(answer.exchange.clone());
                answers.push(answer);
            }
            answers
        });
    }

    let mut slots: Vec<Option<Answer>> = (0..total).map(|_| None).collect();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(answers) => {
                for answer in answers {
                    let index = answer.index;
                    slots[index] = Some(answer);
                }
            }
            Err(e) => warn!(error = %e, "clarification task panicked"),
        }
    }

    slots
        .into_iter()
        .zip(fallback)
        .enumerate()
        .map(|(index, (slot, (target, question)))| {
            slot.unwrap_or_else(|| Answer {
                index,
                exchange: QaExchange::failed(round, target, question, "query task panicked"),
                memo_update: None,
                parse_warnings: Vec::new(),
            })
        })
        .collect()
}
