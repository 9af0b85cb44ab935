//! Mocked orchestration test: runs the whole review pipeline with scripted
//! agents (no LLM calls) and a real file-backed memo store.
//!
//! Covers: pool ↔ arbiter ↔ memo ledger ↔ report in a single pass.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use review_coordination::{
    AgentIdentity, AgentInvoker, ArbiterConfig, ArbiterMode, ArbiterPhase, BackendFamily,
    FileMemoStore, InvocationError, MemoKey, MemoStore, Orchestrator, Priority, ReviewError,
    ReviewRequest, RunConfig, RunWarning, Translator,
};

const ARBITER: &str = "Codex[gpt-5.1-codex|low]";

/// Scripted agent backend: per-agent reply queues, a fallback reply, failure
/// injection and a call log.
#[derive(Default)]
struct MockInvoker {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    failing: Vec<String>,
    calls: AtomicUsize,
    log: Mutex<Vec<(String, String)>>,
}

impl MockInvoker {
    fn script(self, name: &str, replies: &[&str]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), replies.iter().map(|r| r.to_string()).collect());
        self
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    fn prompts_for(&self, name: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for MockInvoker {
    async fn invoke(
        &self,
        identity: &AgentIdentity,
        prompt: &str,
        _context: &str,
    ) -> Result<String, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push((identity.name.clone(), prompt.to_string()));

        if self.failing.contains(&identity.name) {
            return Err(InvocationError::NonZeroExit {
                code: Some(1),
                stderr: "model overloaded".into(),
            });
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&identity.name)
            .and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| {
            if identity.name == ARBITER {
                "All good.\nCONTROL_JSON: {\"no_questions\":true}".to_string()
            } else {
                format!("Looks fine.\n[P3] nit from {}", identity.name)
            }
        }))
    }
}

struct UpperTranslator;

#[async_trait]
impl Translator for UpperTranslator {
    async fn translate(&self, text: &str, _language: &str) -> Result<String, InvocationError> {
        Ok(text.to_uppercase())
    }
}

fn reviewer(name: &str) -> AgentIdentity {
    AgentIdentity::new(name, BackendFamily::Codex, "gpt-5.1")
}

fn config(names: &[&str], mode: ArbiterMode) -> RunConfig {
    let arbiter = ArbiterConfig::new(
        AgentIdentity::new(ARBITER, BackendFamily::Codex, "gpt-5.1-codex").with_effort("low"),
    )
    .with_mode(mode);
    RunConfig::new(names.iter().map(|n| reviewer(n)).collect(), arbiter)
}

fn request() -> ReviewRequest {
    ReviewRequest::new("Review the cache rewrite", "diff --git a/cache.rs b/cache.rs").with_label("cache")
}

fn memo_of(store: &FileMemoStore, name: &str) -> Option<String> {
    store
        .load(&MemoKey::normalize(name))
        .unwrap()
        .map(|m| m.as_str().to_string())
}

// ── Partial reviewer failure ─────────────────────────────────────────────────

#[tokio::test]
async fn test_one_failing_reviewer_still_produces_report() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileMemoStore::new(dir.path()));
    let invoker = Arc::new(
        MockInvoker::default()
            .script("A", &["[P1] unbounded cache growth\nLocation: src/cache.rs:42"])
            .script("C", &["[P0] data race on eviction"])
            .script(
                ARBITER,
                &["Two real issues.\n[P2] a\n[P0] data race on eviction\nModels: proposed_by=[C], agreed_by=[A]\n[P1] unbounded cache growth\n[P3] c"],
            )
            .failing("B"),
    );

    let report = Orchestrator::new(config(&["A", "B", "C"], ArbiterMode::Single), invoker.clone(), store)
        .run(request())
        .await
        .unwrap();

    assert_eq!(report.reviewers.len(), 3);
    assert!(!report.reviewers[1].succeeded);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, RunWarning::ReviewerFailed { reviewer, .. } if reviewer == "B")));

    let priorities: Vec<Priority> = report.findings.iter().map(|f| f.priority).collect();
    assert_eq!(priorities, vec![Priority::P0, Priority::P1, Priority::P2, Priority::P3]);
    assert_eq!(
        report.findings[0].attribution.as_ref().unwrap().agreed_by,
        vec!["A".to_string()]
    );

    // The failed reviewer's output never reaches the arbiter.
    let arbiter_prompt = &invoker.prompts_for(ARBITER)[0];
    assert!(arbiter_prompt.contains("<REVIEW name=\"A\">"));
    assert!(!arbiter_prompt.contains("<REVIEW name=\"B\">"));

    let md = report.to_markdown(false);
    assert!(md.contains("[P0] data race on eviction"));
    assert!(!md.contains("[P3] c"));
}

#[tokio::test]
async fn test_all_reviewers_failing_is_fatal() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(MockInvoker::default().failing("A").failing("B"));
    let err = Orchestrator::new(
        config(&["A", "B"], ArbiterMode::Multi),
        invoker.clone(),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap_err();

    assert!(matches!(err, ReviewError::AllReviewersFailed { failed: 2 }));
    assert!(invoker.prompts_for(ARBITER).is_empty());
}

// ── Clarification loop ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_ghost_target_dropped_and_run_synthesizes() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(MockInvoker::default().script(
        ARBITER,
        &[
            "Need detail.\nCONTROL_JSON: {\"questions\":[{\"target\":\"Ghost\",\"question\":\"?\"},{\"target\":\"A\",\"question\":\"Is the race real?\"}]}",
            "Clear now.\nCONTROL_JSON: {\"no_questions\":true}",
            "Final.\n[P1] race is real",
        ],
    ));

    let report = Orchestrator::new(
        config(&["A", "B"], ArbiterMode::Multi),
        invoker.clone(),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap();

    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, RunWarning::QueryDropped { target, .. } if target == "Ghost")));
    assert_eq!(report.qa.len(), 1);
    assert_eq!(report.qa[0].target, "A");
    assert_eq!(report.rounds_used, 1);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.transitions.last().unwrap().to, ArbiterPhase::Done);
    // Only the targeted reviewer was asked.
    assert_eq!(invoker.prompts_for("A").len(), 2);
    assert_eq!(invoker.prompts_for("B").len(), 1);
}

#[tokio::test]
async fn test_arbiter_memo_line_does_not_cancel_its_questions() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileMemoStore::new(dir.path()));
    let invoker = Arc::new(MockInvoker::default().script(
        ARBITER,
        &[
            "Need one check.\n\
             CONTROL_JSON: {\"questions\":[{\"target\":\"A\",\"question\":\"Is eviction locked?\"}]}\n\
             CONTROL_JSON: {\"memo\":\"A flags races reliably\",\"append\":true}",
            "Settled.\nCONTROL_JSON: {\"no_questions\":true,\"memo\":\"check locking first\",\"append\":true}",
            "Final.\n[P0] data race on eviction",
        ],
    ));

    let report = Orchestrator::new(config(&["A", "B"], ArbiterMode::Multi), invoker.clone(), store.clone())
        .run(request())
        .await
        .unwrap();

    assert!(report.transitions.iter().any(|t| t.to == ArbiterPhase::Querying));
    assert_eq!(report.qa.len(), 1);
    assert_eq!(report.qa[0].question, "Is eviction locked?");
    assert_eq!(invoker.prompts_for("A").len(), 2);
    assert_eq!(
        memo_of(&store, ARBITER).as_deref(),
        Some("A flags races reliably\ncheck locking first")
    );
}

#[tokio::test]
async fn test_querying_bounded_by_max_rounds() {
    let dir = TempDir::new().unwrap();
    let ask = "More.\nCONTROL_JSON: {\"questions\":[{\"target\":\"A\",\"question\":\"again?\"}]}";
    let invoker = Arc::new(MockInvoker::default().script(ARBITER, &[ask; 8]));
    let mut cfg = config(&["A"], ArbiterMode::Multi);
    cfg.arbiter.max_rounds = 3;

    let report = Orchestrator::new(cfg, invoker.clone(), Arc::new(FileMemoStore::new(dir.path())))
        .run(request())
        .await
        .unwrap();

    let querying = report
        .transitions
        .iter()
        .filter(|t| t.to == ArbiterPhase::Querying)
        .count();
    assert_eq!(querying, 3);
    assert_eq!(report.rounds_used, 3);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, RunWarning::BudgetExhausted { .. })));
    // 3 collect+query rounds, one over-budget collect, one synthesis.
    assert_eq!(invoker.prompts_for(ARBITER).len(), 5);
}

#[tokio::test]
async fn test_single_mode_never_queries() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(MockInvoker::default().script(
        ARBITER,
        &["Done.\nCONTROL_JSON: {\"questions\":[{\"target\":\"A\",\"question\":\"?\"}]}"],
    ));
    let report = Orchestrator::new(
        config(&["A", "B"], ArbiterMode::Single),
        invoker.clone(),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap();

    assert_eq!(report.rounds_used, 0);
    assert!(report.qa.is_empty());
    assert!(report.transitions.iter().all(|t| t.to != ArbiterPhase::Querying));
    assert_eq!(invoker.prompts_for(ARBITER).len(), 1);
    assert_eq!(invoker.prompts_for("A").len(), 1);
}

// ── Configuration ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_identity_collision_fails_before_any_invocation() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(MockInvoker::default());
    let err = Orchestrator::new(
        config(&["Model A", "model-a"], ArbiterMode::Single),
        invoker.clone(),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap_err();

    assert!(matches!(err, ReviewError::IdentityCollision { .. }));
    assert!(err.is_fatal_before_dispatch());
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_config_fails_before_any_invocation() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(MockInvoker::default());
    let err = Orchestrator::new(
        config(&[], ArbiterMode::Single),
        invoker.clone(),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap_err();
    assert!(matches!(err, ReviewError::Configuration(_)));
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
}

// ── Memos ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_memos_persist_after_success_and_feed_next_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileMemoStore::new(dir.path()));
    let invoker = Arc::new(
        MockInvoker::default()
            .script("A", &["[P2] x\nCONTROL_JSON: {\"memo\":\"repo uses tokio\",\"append\":false}"])
            .script(
                "B",
                &["[P2] y\nCONTROL_JSON: {\"memo\":\"broken json\",\"append\":"],
            ),
    );

    let report = Orchestrator::new(config(&["A", "B"], ArbiterMode::Single), invoker, store.clone())
        .run(request())
        .await
        .unwrap();

    assert_eq!(report.memos_saved, 1);
    assert_eq!(memo_of(&store, "A").as_deref(), Some("repo uses tokio"));
    assert_eq!(memo_of(&store, "B"), None);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, RunWarning::ParseWarning { agent, .. } if agent == "B")));

    // Second run: A sees its memo, B does not.
    let invoker = Arc::new(MockInvoker::default());
    Orchestrator::new(config(&["A", "B"], ArbiterMode::Single), invoker.clone(), store)
        .run(request())
        .await
        .unwrap();
    assert!(invoker.prompts_for("A")[0].contains("repo uses tokio"));
    assert!(!invoker.prompts_for("B")[0].contains("repo uses tokio"));
}

#[tokio::test]
async fn test_arbiter_failure_persists_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileMemoStore::new(dir.path()));
    let invoker = Arc::new(
        MockInvoker::default()
            .script("A", &["[P2] x\nCONTROL_JSON: {\"memo\":\"should not persist\",\"append\":true}"])
            .failing(ARBITER),
    );

    let err = Orchestrator::new(config(&["A"], ArbiterMode::Multi), invoker, store.clone())
        .run(request())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReviewError::ArbiterFailed { phase: ArbiterPhase::Collecting, .. }
    ));
    assert_eq!(memo_of(&store, "A"), None);
}

// ── Optional stages ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_peer_review_pass_revises_reviews() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(
        MockInvoker::default()
            .script("A", &["[P2] first take", "[P1] revised after reading B"])
            .script("B", &["[P1] b issue", "[P1] b issue confirmed"]),
    );
    let mut cfg = config(&["A", "B"], ArbiterMode::Single);
    cfg.peer_review = true;

    let report = Orchestrator::new(cfg, invoker.clone(), Arc::new(FileMemoStore::new(dir.path())))
        .run(request())
        .await
        .unwrap();

    assert_eq!(invoker.prompts_for("A").len(), 2);
    assert!(invoker.prompts_for("A")[1].contains("b issue"));
    let arbiter_prompt = &invoker.prompts_for(ARBITER)[0];
    assert!(arbiter_prompt.contains("revised after reading B"));
    assert!(!arbiter_prompt.contains("first take"));
    assert!(report.reviewers.iter().all(|r| r.succeeded));
}

#[tokio::test]
async fn test_translation_applies_to_summary_only() {
    let dir = TempDir::new().unwrap();
    let invoker = Arc::new(
        MockInvoker::default().script(ARBITER, &["overall fine\n[P1] keep title"]),
    );
    let mut cfg = config(&["A"], ArbiterMode::Single);
    cfg.output_language = Some("zh".into());

    let report = Orchestrator::new(cfg, invoker, Arc::new(FileMemoStore::new(dir.path())))
        .with_translator(Arc::new(UpperTranslator))
        .run(request())
        .await
        .unwrap();

    assert_eq!(report.summary, "OVERALL FINE");
    assert_eq!(report.findings[0].title, "keep title");
    assert_eq!(report.language.as_deref(), Some("zh"));
}

#[tokio::test]
async fn test_missing_translator_is_soft() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&["A"], ArbiterMode::Single);
    cfg.output_language = Some("zh".into());

    let report = Orchestrator::new(
        cfg,
        Arc::new(MockInvoker::default()),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, RunWarning::TranslationFailed { .. })));
    assert!(report.language.is_none());
}

// ── Timeouts and cancellation ────────────────────────────────────────────────

struct StallingInvoker {
    stall: String,
}

#[async_trait]
impl AgentInvoker for StallingInvoker {
    async fn invoke(
        &self,
        identity: &AgentIdentity,
        _prompt: &str,
        _context: &str,
    ) -> Result<String, InvocationError> {
        if identity.name == self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok("[P2] fine".into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_reviewer_timeout_is_soft() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&["A", "Slow"], ArbiterMode::Single);
    cfg.limits.agent_timeout_secs = Some(30);

    let report = Orchestrator::new(
        cfg,
        Arc::new(StallingInvoker { stall: "Slow".into() }),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap();

    let slow = report.reviewers.iter().find(|r| r.name == "Slow").unwrap();
    assert!(!slow.succeeded);
    assert!(slow.failure.as_deref().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_arbiter_timeout_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&["A"], ArbiterMode::Single);
    cfg.limits.agent_timeout_secs = Some(30);

    let err = Orchestrator::new(
        cfg,
        Arc::new(StallingInvoker { stall: ARBITER.into() }),
        Arc::new(FileMemoStore::new(dir.path())),
    )
    .run(request())
    .await
    .unwrap_err();
    assert!(matches!(err, ReviewError::ArbiterFailed { .. }));
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let orch = Orchestrator::new(
        config(&["A"], ArbiterMode::Single),
        Arc::new(MockInvoker::default()),
        Arc::new(FileMemoStore::new(dir.path())),
    );
    orch.cancellation_token().cancel();

    let err = orch.run(request()).await.unwrap_err();
    assert!(matches!(err, ReviewError::AllReviewersFailed { failed: 1 }));
}

struct StallingTranslator;

#[async_trait]
impl Translator for StallingTranslator {
    async fn translate(&self, _text: &str, _language: &str) -> Result<String, InvocationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("never".into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_translation_respects_run_timeout() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileMemoStore::new(dir.path()));
    let invoker = Arc::new(MockInvoker::default().script(
        "A",
        &["[P2] fine\nCONTROL_JSON: {\"memo\":\"seen cache.rs\"}"],
    ));
    let mut cfg = config(&["A"], ArbiterMode::Single);
    cfg.output_language = Some("zh".into());
    cfg.limits.run_timeout_secs = Some(60);

    let started = tokio::time::Instant::now();
    let report = Orchestrator::new(cfg, invoker, store.clone())
        .with_translator(Arc::new(StallingTranslator))
        .run(request())
        .await
        .unwrap();

    assert!(started.elapsed() <= Duration::from_secs(60));
    assert_eq!(report.summary, "All good.");
    assert!(report.language.is_none());
    assert!(report.warnings.iter().any(
        |w| matches!(w, RunWarning::TranslationFailed { reason, .. } if reason.contains("timed out"))
    ));
    // Translation is soft, so memos still persist.
    assert_eq!(memo_of(&store, "A").as_deref(), Some("seen cache.rs"));
}
