//! Prompt builders for reviewers and the arbiter.
//!
//! Every prompt embeds the task, the context and (for memo owners) the
//! agent's own memo. Control-line examples are rendered through
//! `ControlPayload::to_line` so the instructions always match the parser.

use crate::arbiter::QaExchange;
use crate::finding::Priority;
use crate::identity::AgentIdentity;
use crate::memo::{Memo, MemoUpdate};
use crate::protocol::{ArbiterDirective, ControlPayload, QueryRequest};
use crate::review::ReviewResult;
use crate::runner::ReviewRequest;

const EMPTY_MEMO: &str = "(empty)";
const NO_PREVIOUS_QA: &str = "(no previous Q&A with you)";

fn tagged(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{}\n</{tag}>", body.trim_end())
}

fn memo_text(memo: Option<&Memo>) -> &str {
    match memo {
        Some(m) if !m.is_empty() => m.as_str(),
        _ => EMPTY_MEMO,
    }
}

fn priority_scale() -> String {
    Priority::ALL
        .iter()
        .map(|p| format!("  - {p}: {}", p.meaning()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn memo_instructions() -> String {
    let example = ControlPayload {
        memo: Some(MemoUpdate::append("<notes for your future reviews>")),
        directive: None,
    }
    .to_line();
    format!(
        "Private memo update (optional). As the last line of your answer you may write:\n\n\
         {example}\n\n\
         - `memo` holds notes you want to keep for future reviews of this repository.\n\
         - `\"append\": true` adds the text to your memo; `false` replaces the memo.\n\
         - Leave the line out if you have nothing to record."
    )
}

fn reviewer_preamble(identity: &AgentIdentity, request: &ReviewRequest, memo: Option<&Memo>) -> String {
    format!(
        "You are **{name}**, a senior code reviewer. Analyze and comment only; do not modify \
         any project files.\n\n\
         {task}\n\n\
         Context supplied by the coordinator (a diff, a note, or other text):\n\n\
         {context}\n\n\
         Your private memo (only you and the coordinator can see it):\n\n\
         {memo}",
        name = identity.name,
        task = tagged("REVIEW_TASK", &request.task),
        context = tagged("CONTEXT", &request.context),
        memo = tagged("YOUR_PRIVATE_MEMO", memo_text(memo)),
    )
}

fn finding_format() -> String {
    format!(
        "Output format:\n\
         - Markdown. Start with a one or two sentence overall summary.\n\
         - Then list every issue as its own item starting at the beginning of a line with a \
         priority marker, e.g. `[P0] Short title` or `[P2] Short title`.\n\
         - Under each item give `Location: <file:line or section>`, the problem, why it \
         matters, and a concrete fix.\n\
         - Add `(NEEDS HUMAN REVIEW)` to an item that a human must double-check.\n\
         Priority scale:\n{}",
        priority_scale()
    )
}

/// First, independent review.
pub fn reviewer_initial(identity: &AgentIdentity, request: &ReviewRequest, memo: Option<&Memo>) -> String {
    format!(
        "{preamble}\n\n\
         Your job: find bugs, missing edge cases, performance problems, security risks and \
         readability issues relevant to the task. Explain each issue and how to fix it. Call out \
         anything risky or ambiguous that needs a human engineer.\n\n\
         {format}\n\n{memo}",
        preamble = reviewer_preamble(identity, request, memo),
        format = finding_format(),
        memo = memo_instructions(),
    )
}

/// Cross-check pass: the reviewer sees the other reviewers' latest reviews.
pub fn reviewer_cross_check(
    identity: &AgentIdentity,
    request: &ReviewRequest,
    own: &ReviewResult,
    others: &[&ReviewResult],
    memo: Option<&Memo>,
) -> String {
    let others_block = if others.is_empty() {
        "(no other reviews)".to_string()
    } else {
        others
            .iter()
            .map(|r| format!("<REVIEW name=\"{}\">\n{}\n</REVIEW>", r.name(), r.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "{preamble}\n\n\
         Your earlier review:\n\n{own}\n\n\
         The other reviewers' reviews:\n\n{others}\n\n\
         Your job in this pass:\n\
         - For every P0/P1 issue raised by anyone, decide whether it is real and whether the \
         priority is right.\n\
         - Adopt valid issues you missed, with your own priority.\n\
         - State disagreements briefly and explain them.\n\
         - Produce an updated, self-contained review in the same format as before.\n\n\
         {format}\n\n{memo}",
        preamble = reviewer_preamble(identity, request, memo),
        own = tagged("YOUR_REVIEW", &own.text),
        others = tagged("OTHER_REVIEWS", &others_block),
        format = finding_format(),
        memo = memo_instructions(),
    )
}

/// Previous exchanges between the arbiter and `target`, or a placeholder.
pub fn qa_snippet_for(target: &str, history: &[QaExchange]) -> String {
    let parts: Vec<String> = history
        .iter()
        .filter(|qa| qa.target == target)
        .map(|qa| format!("Q: {}\nA: {}", qa.question, qa.answer))
        .collect();
    if parts.is_empty() {
        NO_PREVIOUS_QA.to_string()
    } else {
        parts.join("\n---\n")
    }
}

/// Clarification question from the arbiter to one reviewer.
pub fn reviewer_followup(
    identity: &AgentIdentity,
    request: &ReviewRequest,
    own: &ReviewResult,
    question: &str,
    qa_snippet: &str,
    memo: Option<&Memo>,
) -> String {
    format!(
        "{preamble}\n\n\
         Your earlier review:\n\n{own}\n\n\
         The review coordinator has a follow-up question:\n\n{question}\n\n\
         Your previous Q&A with the coordinator (ignore it if unhelpful):\n\n{qa}\n\n\
         Answer carefully:\n\
         - Say whether you **agree** the discussed code is a real problem, **disagree**, or \
         are **uncertain**, even if you did not raise it yourself.\n\
         - Give your confidence (0 to 1) and a concrete recommendation.\n\
         - If it is an issue, give the priority you would assign.\n\
         Priority scale:\n{scale}\n\n\
         {memo}",
        preamble = reviewer_preamble(identity, request, memo),
        own = tagged("YOUR_REVIEW", &own.text),
        question = tagged("QUESTION_FROM_COORDINATOR", question),
        qa = tagged("YOUR_PREVIOUS_QA", qa_snippet),
        scale = priority_scale(),
        memo = memo_instructions(),
    )
}

/// What the arbiter is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterTask {
    /// Cross-review; may ask clarification questions.
    Collect,
    /// Produce the unified review now; no questions allowed.
    Synthesize,
}

/// Budget figures shown to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetView {
    pub rounds_used: u32,
    pub max_rounds: u32,
    pub queries_used: u32,
    pub max_queries: u32,
}

/// Inputs shared by every arbiter prompt.
pub struct ArbiterPromptInput<'a> {
    pub arbiter: &'a AgentIdentity,
    pub request: &'a ReviewRequest,
    pub reviews: &'a [&'a ReviewResult],
    pub qa: &'a [QaExchange],
    pub budget: BudgetView,
    pub include_low_priority: bool,
    pub memo: Option<&'a Memo>,
}

pub fn arbiter(input: &ArbiterPromptInput<'_>, task: ArbiterTask) -> String {
    let roster = input
        .reviews
        .iter()
        .map(|r| format!("- {}", r.name()))
        .collect::<Vec<_>>()
        .join("\n");

    let reviews = input
        .reviews
        .iter()
        .map(|r| format!("<REVIEW name=\"{}\">\n{}\n</REVIEW>", r.name(), r.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let qa = if input.qa.is_empty() {
        "(no follow-up questions have been asked yet)".to_string()
    } else {
        input
            .qa
            .iter()
            .enumerate()
            .map(|(i, qa)| {
                format!(
                    "<QA_EXCHANGE index='{}' round='{}' reviewer='{}'>\nQUESTION:\n{}\n\nANSWER:\n{}\n</QA_EXCHANGE>",
                    i + 1,
                    qa.round,
                    qa.target,
                    qa.question,
                    qa.answer
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let mut prompt = format!(
        "You are the **arbiter code reviewer** {name}.\n\n\
         {task}\n\n\
         Context supplied by the coordinator:\n\n{context}\n\n\
         You coordinate independent reviewers. You do not read the code yourself; you reason \
         only about what the reviewers wrote and their answers to you. Reviewers only talk to \
         you and do not know about each other; never mention other reviewers in a question.\n\n\
         Your job:\n\
         - Find where reviewers agree, and where they are uncertain or disagree.\n\
         - Cross-check important issues across reviewers instead of trusting the first mention.\n\
         - Do not force consensus. Mark genuinely unclear items `NEEDS HUMAN REVIEW` with a short \
         reason.\n\n\
         Your private memo:\n\n{memo}\n\n\
         Reviewers:\n{roster}\n\n\
         Reviews:\n\n{reviews}\n\n\
         Follow-up Q&A so far:\n\n{qa}\n\n",
        name = input.arbiter.name,
        task = tagged("REVIEW_TASK", &input.request.task),
        context = tagged("CONTEXT", &input.request.context),
        memo = tagged("YOUR_PRIVATE_MEMO", memo_text(input.memo)),
    );

    match task {
        ArbiterTask::Collect => {
            let ask = ControlPayload {
                memo: Some(MemoUpdate::append("<optional notes for your future reviews>")),
                directive: Some(ArbiterDirective::Ask(vec![QueryRequest {
                    target: "<exact reviewer name>".into(),
                    question: "<one concrete, neutral question>".into(),
                }])),
            }
            .to_line();
            let done = ControlPayload {
                memo: None,
                directive: Some(ArbiterDirective::NoQuestions),
            }
            .to_line();
            let rounds_left = input.budget.max_rounds.saturating_sub(input.budget.rounds_used);
            let queries_left = input.budget.max_queries.saturating_sub(input.budget.queries_used);
            prompt.push_str(&format!(
                "=== THIS STEP: CROSS-REVIEW ===\n\
                 Write a short analysis of agreements and disagreements. Then decide whether you \
                 need clarification. You have {rounds_left} clarification round(s) and \
                 {queries_left} question(s) left. Questions in one round are sent in parallel, \
                 at most a few per round; each goes to exactly one reviewer.\n\
                 Before finishing, every P0/P1 issue proposed by one reviewer should have been \
                 put to the others, and every reviewer should have been asked at least once \
                 about the emerging P0/P1 list, budget permitting.\n\n\
                 End your answer with exactly one control line. It carries your decision and, \
                 in the same JSON object, any private memo update (`memo` and `append` are \
                 optional; `\"append\": true` adds to your memo, `false` replaces it). \
                 To ask questions:\n\n{ask}\n\n\
                 (`questions` may hold several entries.) If you need nothing more:\n\n{done}\n"
            ));
        }
        ArbiterTask::Synthesize => {
            prompt.push_str(&format!(
                "=== THIS STEP: FINAL UNIFIED REVIEW ===\n\
                 Do not ask any more questions. Write the final review for humans:\n\
                 - Start with an overall summary in the context of the task.\n\
                 - Give a unified, deduplicated issue list. Start every item at the beginning of \
                 a line with its priority, e.g. `[P0] Title`.\n\
                 - Under each item add `Location: ...` when known, and a machine-readable line \
                 `Models: proposed_by=[...], agreed_by=[...]` naming reviewers from the list \
                 above. Only leave `agreed_by` empty when no agreement can be inferred.\n\
                 - Where reviewers disagree about an issue or its priority, say so, still pick \
                 one priority, and add `NEEDS HUMAN REVIEW` if doubt remains.\n\
                 Priority scale:\n{}\n",
                priority_scale()
            ));
        }
    }

    if !input.include_low_priority {
        prompt.push_str(
            "\nDISPLAY POLICY: list only P0 and P1 issues as items. You may mention that \
             lower-priority issues exist, but do not list them individually.\n",
        );
    }

    // Collect folds the memo into its single decision line.
    if matches!(task, ArbiterTask::Synthesize) {
        prompt.push('\n');
        prompt.push_str(&memo_instructions());
    }
    prompt
}
