//! The five-stage query pipeline.
//!
//! Every request runs rewrite → retrieve → assess-retrieval → generate →
//! assess-confidence in that order. Stages never abort the run: a failing stage
//! records a [`StageNote`] and hands the next stage a degraded state, so a caller
//! always receives an answer, even if it is only the apology text.

use std::sync::Arc;
use std::time::Duration;

use precedent_ai::{AiError, ChatMessage, ChatModel, ModelPair};
use precedent_core::{
    Citation, Confidence, ConfidenceAssessor, ConfidenceLevel, Passage, Settings, Turn,
    extract_citations,
};
use precedent_store::{MetadataFilter, SessionStore, StoreError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::prompts;
use crate::{PassageRetriever, SessionLanes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Session,
    Rewrite,
    Retrieve,
    AssessRetrieval,
    Generate,
    AssessConfidence,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Rewrite => "rewrite",
            Self::Retrieve => "retrieve",
            Self::AssessRetrieval => "assess_retrieval",
            Self::Generate => "generate",
            Self::AssessConfidence => "assess_confidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSeverity {
    /// The stage degraded and the run continued.
    Soft,
    /// No model could produce an answer; the apology was returned instead.
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageNote {
    pub stage: Stage,
    pub severity: NoteSeverity,
    pub message: String,
}

impl StageNote {
    fn soft(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: NoteSeverity::Soft,
            message: message.into(),
        }
    }

    fn hard(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: NoteSeverity::Hard,
            message: message.into(),
        }
    }
}

/// Everything one run accumulates. Discarded once the response is built.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub query: String,
    /// Session turns before this query, oldest first.
    pub history: Vec<Turn>,
    pub rewritten_query: Option<String>,
    pub passages: Vec<Passage>,
    pub retrieval_confidence: f64,
    pub answer: String,
    /// Name of the model that produced `answer`; `None` for the apology.
    pub answered_by: Option<String>,
    pub model_confidence: Option<Confidence>,
    pub citations: Vec<Citation>,
    pub notes: Vec<StageNote>,
}

impl QueryState {
    pub fn new(query: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            query: query.into(),
            history,
            rewritten_query: None,
            passages: Vec::new(),
            retrieval_confidence: 0.0,
            answer: String::new(),
            answered_by: None,
            model_confidence: None,
            citations: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// The question later stages work from.
    pub fn effective_query(&self) -> &str {
        self.rewritten_query.as_deref().unwrap_or(&self.query)
    }
}

/// Result of one run, ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub confidence: ConfidenceLevel,
    pub confidence_score: f64,
    pub retrieval_confidence: f64,
    pub model_confidence: f64,
    pub model_confidence_level: ConfidenceLevel,
    pub citations: Vec<Citation>,
    pub passages: Vec<Passage>,
    pub rewritten_query: String,
    pub answered_by: Option<String>,
    pub notes: Vec<StageNote>,
    /// Notes rendered as one string, `None` when the run was clean.
    pub error: Option<String>,
    pub disclaimer: String,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowOptions {
    pub top_k: usize,
    /// Upper bound on any single model or retrieval call, retries included.
    pub call_timeout: Duration,
}

impl WorkflowOptions {
    /// Derive the call budget from the HTTP timeout and retry policy so the
    /// engine never cuts off a call the client would still retry.
    pub fn from_settings(settings: &Settings) -> Self {
        let retry = &settings.retry;
        let attempts = retry.max_retries.saturating_add(1);
        let backoff: Duration = (1..=retry.max_retries).map(|n| retry.backoff_for(n)).sum();
        Self {
            top_k: settings.top_k,
            call_timeout: settings
                .request_timeout
                .saturating_mul(attempts)
                .saturating_add(backoff),
        }
    }
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

pub struct QueryWorkflow {
    models: ModelPair,
    retriever: Arc<dyn PassageRetriever>,
    sessions: Arc<dyn SessionStore>,
    lanes: SessionLanes,
    assessor: ConfidenceAssessor,
    options: WorkflowOptions,
}

impl QueryWorkflow {
    pub fn new(
        models: ModelPair,
        retriever: Arc<dyn PassageRetriever>,
        sessions: Arc<dyn SessionStore>,
        assessor: ConfidenceAssessor,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            models,
            retriever,
            sessions,
            lanes: SessionLanes::new(),
            assessor,
            options,
        }
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn retriever(&self) -> &Arc<dyn PassageRetriever> {
        &self.retriever
    }

    /// Answer `query` within `session_id`. Never fails; problems surface as notes.
    ///
    /// `history` only seeds a session the store has no turns for.
    pub async fn answer_query(
        &self,
        query: &str,
        session_id: &str,
        history: &[Turn],
    ) -> QueryResponse {
        self.answer_query_filtered(query, session_id, history, None)
            .await
    }

    /// As [`answer_query`](Self::answer_query), restricting retrieval to passages
    /// whose metadata matches `filter`.
    pub async fn answer_query_filtered(
        &self,
        query: &str,
        session_id: &str,
        history: &[Turn],
        filter: Option<&MetadataFilter>,
    ) -> QueryResponse {
        let lane = self.lanes.acquire(session_id).await;
        info!(session = session_id, "query received");

        let mut notes = Vec::new();
        let prior = self.open_session(session_id, history, &mut notes).await;
        self.record(session_id, Turn::user(query), &mut notes).await;

        let mut state = QueryState::new(query, prior);
        state.notes = notes;

        self.rewrite(&mut state).await;
        self.retrieve(&mut state, filter).await;
        self.assess_retrieval(&mut state);
        self.generate(&mut state).await;
        self.assess_confidence(&mut state).await;

        let reply = Turn::assistant(state.answer.clone());
        self.record(session_id, reply, &mut state.notes).await;

        let response = self.respond(state);
        info!(
            session = session_id,
            confidence = %response.confidence,
            score = response.confidence_score,
            citations = response.citations.len(),
            notes = response.notes.len(),
            "query answered"
        );
        drop(lane);
        self.lanes.prune();
        response
    }

    /// Forget a session's turns, waiting for any in-flight run on it.
    pub async fn reset_session(&self, session_id: &str) -> Result<(), StoreError> {
        let lane = self.lanes.acquire(session_id).await;
        self.sessions.clear(session_id).await?;
        drop(lane);
        self.lanes.prune();
        Ok(())
    }

    // ── Session bookkeeping ──

    async fn open_session(
        &self,
        session_id: &str,
        history: &[Turn],
        notes: &mut Vec<StageNote>,
    ) -> Vec<Turn> {
        let stored = match self.sessions.turns(session_id).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(session = session_id, error = %e, "session load failed");
                notes.push(StageNote::soft(Stage::Session, format!("Session load failed: {e}")));
                return history.to_vec();
            }
        };
        if !stored.is_empty() || history.is_empty() {
            return stored;
        }

        debug!(session = session_id, turns = history.len(), "seeding session from caller history");
        if let Err(e) = self.sessions.append(session_id, history).await {
            warn!(session = session_id, error = %e, "session seed failed");
            notes.push(StageNote::soft(Stage::Session, format!("Session update failed: {e}")));
        }
        history.to_vec()
    }

    async fn record(&self, session_id: &str, turn: Turn, notes: &mut Vec<StageNote>) {
        if let Err(e) = self.sessions.append(session_id, &[turn]).await {
            warn!(session = session_id, error = %e, "session append failed");
            notes.push(StageNote::soft(Stage::Session, format!("Session update failed: {e}")));
        }
    }

    // ── Stages ──

    async fn rewrite(&self, state: &mut QueryState) {
        if state.history.is_empty() {
            state.rewritten_query = Some(state.query.clone());
            return;
        }

        let prompt = prompts::reformulation_prompt(&state.history, &state.query);
        match self
            .invoke(&self.models.primary, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                debug!(rewritten = %rewritten, "query rewritten");
                state.rewritten_query = Some(rewritten.trim().to_string());
            }
            Ok(_) => {
                state.rewritten_query = Some(state.query.clone());
            }
            Err(e) => {
                warn!(error = %e, "query reformulation failed, using original");
                state.rewritten_query = Some(state.query.clone());
                state.notes.push(StageNote::soft(
                    Stage::Rewrite,
                    format!("Query reformulation failed: {e}"),
                ));
            }
        }
    }

    async fn retrieve(&self, state: &mut QueryState, filter: Option<&MetadataFilter>) {
        let query = state.effective_query().to_string();
        let call = self.retriever.retrieve(&query, self.options.top_k, filter);
        let result = match tokio::time::timeout(self.options.call_timeout, call).await {
            Ok(Ok(retrieval)) => Ok(retrieval),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.options.call_timeout)),
        };

        match result {
            Ok(retrieval) => {
                state.passages = retrieval.passages;
                state.retrieval_confidence = retrieval.average_score;
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without passages");
                state.passages.clear();
                state.retrieval_confidence = 0.0;
                state
                    .notes
                    .push(StageNote::soft(Stage::Retrieve, format!("Retrieval failed: {e}")));
            }
        }
    }

    /// Extension point for relevance filtering; currently passes state through.
    fn assess_retrieval(&self, state: &mut QueryState) {
        debug!(
            passages = state.passages.len(),
            retrieval_confidence = state.retrieval_confidence,
            "retrieval assessed"
        );
    }

    async fn generate(&self, state: &mut QueryState) {
        let context = prompts::format_context(&state.passages);
        let messages = [
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::generation_prompt(&context, state.effective_query())),
        ];

        let mut failures: Vec<(String, AiError)> = Vec::new();
        for model in self.models.in_order() {
            match self.invoke(model, &messages).await {
                Ok(answer) => {
                    if !failures.is_empty() {
                        warn!(model = model.name(), "answered by fallback model");
                    }
                    state.citations = extract_citations(&answer, &state.passages);
                    state.answer = answer;
                    state.answered_by = Some(model.name().to_string());
                    return;
                }
                Err(e) => {
                    warn!(model = model.name(), error = %e, "generation failed");
                    failures.push((model.name().to_string(), e));
                }
            }
        }

        let message = match failures.as_slice() {
            [(_, primary), (_, fallback)] => {
                format!("Both primary and fallback models failed: {primary}, {fallback}")
            }
            [(_, only)] => format!("Model generation failed: {only}"),
            _ => "Model generation failed".to_string(),
        };
        error!(error = %message, "no model produced an answer");
        state.answer = prompts::APOLOGY.to_string();
        state.answered_by = None;
        state.citations.clear();
        state.notes.push(StageNote::hard(Stage::Generate, message));
    }

    async fn assess_confidence(&self, state: &mut QueryState) {
        let prompt = prompts::self_assessment_prompt(&state.answer);
        let confidence = match self
            .invoke(&self.models.primary, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(reply) => self.assessor.parse_self_rating(&reply),
            Err(e) => {
                warn!(error = %e, "self-assessment failed, using heuristic");
                state.notes.push(StageNote::soft(
                    Stage::AssessConfidence,
                    format!("Confidence assessment failed: {e}"),
                ));
                self.assessor.heuristic(&state.answer)
            }
        };
        state.model_confidence = Some(confidence);
    }

    // ── Helpers ──

    async fn invoke(
        &self,
        model: &Arc<dyn ChatModel>,
        messages: &[ChatMessage],
    ) -> Result<String, AiError> {
        match tokio::time::timeout(self.options.call_timeout, model.invoke(messages)).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Timeout(model.name().to_string())),
        }
    }

    fn respond(&self, state: QueryState) -> QueryResponse {
        let model = state
            .model_confidence
            .unwrap_or_else(|| self.assessor.heuristic(&state.answer));
        let fused = self
            .assessor
            .assess(state.retrieval_confidence, model.score());

        let error = if state.notes.is_empty() {
            None
        } else {
            Some(
                state
                    .notes
                    .iter()
                    .map(|n| n.message.as_str())
                    .collect::<Vec<_>>()
                    .join(" | "),
            )
        };

        QueryResponse {
            rewritten_query: state.effective_query().to_string(),
            answer: state.answer,
            confidence: fused.level(),
            confidence_score: fused.score(),
            retrieval_confidence: state.retrieval_confidence,
            model_confidence: model.score(),
            model_confidence_level: model.level(),
            citations: state.citations,
            passages: state.passages,
            answered_by: state.answered_by,
            notes: state.notes,
            error,
            disclaimer: prompts::DISCLAIMER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IndexHealth, Retrieval, RetrievalError};
    use async_trait::async_trait;
    use precedent_store::InMemorySessionStore;
    use std::sync::Mutex;

    /// Replies from a script; `Err` entries become server errors.
    struct ScriptedModel {
        name: String,
        replies: Mutex<Vec<Result<String, u16>>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(name: &str, replies: Vec<Result<&str, u16>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(String::from))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AiError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(status)) => Err(AiError::Server {
                    provider: self.name.clone(),
                    status,
                    body: "scripted failure".into(),
                }),
                None => Err(AiError::Other("script exhausted".into())),
            }
        }
    }

    struct FixedRetriever {
        passages: Vec<Passage>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PassageRetriever for FixedRetriever {
        async fn retrieve(
            &self,
            query: &str,
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Retrieval, RetrievalError> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(RetrievalError::DimensionMismatch {
                    expected: 1536,
                    actual: 3,
                });
            }
            Ok(Retrieval::from_passages(self.passages.clone()))
        }

        async fn health_check(&self) -> IndexHealth {
            IndexHealth::Unhealthy {
                error: "not used".into(),
            }
        }
    }

    fn passage(name: &str, score: f64) -> Passage {
        Passage {
            id: format!("{}_chunk_0", name.replace(' ', "_").replace('.', "")),
            text: format!("{name} held that consideration requires a bargained-for exchange."),
            case_name: name.into(),
            court: "Supreme Court of California".into(),
            date: "2023-05-15".into(),
            citation: "123 Cal.4th 456".into(),
            topic: None,
            chunk_index: 0,
            total_chunks: 1,
            score,
        }
    }

    fn retriever(passages: Vec<Passage>, fail: bool) -> Arc<FixedRetriever> {
        Arc::new(FixedRetriever {
            passages,
            fail,
            queries: Mutex::new(Vec::new()),
        })
    }

    fn workflow(
        primary: Arc<ScriptedModel>,
        fallback: Option<Arc<ScriptedModel>>,
        retriever: Arc<FixedRetriever>,
    ) -> QueryWorkflow {
        QueryWorkflow::new(
            ModelPair::new(primary, fallback.map(|f| f as Arc<dyn ChatModel>)),
            retriever,
            Arc::new(InMemorySessionStore::new()),
            ConfidenceAssessor::default(),
            WorkflowOptions {
                top_k: 5,
                call_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn first_turn_skips_rewrite_model_call() {
        let primary = ScriptedModel::new("primary", vec![Ok("Answer."), Ok("HIGH")]);
        let r = retriever(vec![], false);
        let wf = workflow(primary.clone(), None, r.clone());

        let resp = wf.answer_query("What is consideration?", "s1", &[]).await;

        assert_eq!(primary.calls(), 2);
        assert_eq!(resp.rewritten_query, "What is consideration?");
        assert_eq!(r.queries.lock().unwrap()[0], "What is consideration?");
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn follow_up_is_rewritten_with_history() {
        let primary = ScriptedModel::new(
            "primary",
            vec![
                Ok("First answer."),
                Ok("MEDIUM"),
                Ok("Must consideration be adequate in contract law?"),
                Ok("Second answer."),
                Ok("LOW"),
            ],
        );
        let r = retriever(vec![], false);
        let wf = workflow(primary.clone(), None, r.clone());

        wf.answer_query("What is consideration?", "s1", &[]).await;
        let resp = wf.answer_query("Must it be adequate?", "s1", &[]).await;

        assert_eq!(resp.rewritten_query, "Must consideration be adequate in contract law?");
        assert_eq!(
            r.queries.lock().unwrap()[1],
            "Must consideration be adequate in contract law?"
        );
        let prompts = primary.prompts.lock().unwrap();
        let rewrite_prompt = &prompts[2][0].content;
        assert!(rewrite_prompt.contains("User: What is consideration?"));
        assert!(rewrite_prompt.contains("Assistant: First answer."));
    }

    #[tokio::test]
    async fn rewrite_failure_keeps_original_query() {
        let primary = ScriptedModel::new("primary", vec![Err(500), Ok("Answer."), Ok("HIGH")]);
        let wf = workflow(primary, None, retriever(vec![], false));

        let history = [Turn::user("Earlier question"), Turn::assistant("Earlier answer")];
        let resp = wf.answer_query("And then?", "s2", &history).await;

        assert_eq!(resp.rewritten_query, "And then?");
        assert_eq!(resp.notes.len(), 1);
        assert_eq!(resp.notes[0].stage, Stage::Rewrite);
        assert_eq!(resp.notes[0].severity, NoteSeverity::Soft);
        assert!(resp.error.unwrap().starts_with("Query reformulation failed"));
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_empty_context() {
        let primary = ScriptedModel::new("primary", vec![Ok("I don't have enough information."), Ok("INSUFFICIENT")]);
        let wf = workflow(primary.clone(), None, retriever(vec![passage("Smith v. Jones", 0.9)], true));

        let resp = wf.answer_query("q", "s3", &[]).await;

        assert_eq!(resp.retrieval_confidence, 0.0);
        assert!(resp.passages.is_empty());
        assert_eq!(resp.notes[0].stage, Stage::Retrieve);
        let generation = &primary.prompts.lock().unwrap()[0][1].content;
        assert!(generation.contains("No relevant cases found."));
    }

    #[tokio::test]
    async fn fallback_answers_when_primary_fails() {
        let primary = ScriptedModel::new("OpenAI-gpt-4o", vec![Err(503), Ok("MEDIUM")]);
        let fallback = ScriptedModel::new(
            "Mistral-mistral-large-latest",
            vec![Ok("Per Smith v. Jones, consideration is required.")],
        );
        let wf = workflow(
            primary.clone(),
            Some(fallback.clone()),
            retriever(vec![passage("Smith v. Jones", 0.8)], false),
        );

        let resp = wf.answer_query("q", "s4", &[]).await;

        assert_eq!(resp.answer, "Per Smith v. Jones, consideration is required.");
        assert_eq!(resp.answered_by.as_deref(), Some("Mistral-mistral-large-latest"));
        assert_eq!(resp.citations.len(), 1);
        assert!(resp.error.is_none());
        assert_eq!(fallback.calls(), 1);
        assert_eq!(
            primary.prompts.lock().unwrap()[0],
            fallback.prompts.lock().unwrap()[0]
        );
    }

    #[tokio::test]
    async fn total_generation_failure_returns_apology() {
        let primary = ScriptedModel::new("p", vec![Err(500), Ok("LOW")]);
        let fallback = ScriptedModel::new("f", vec![Err(502)]);
        let wf = workflow(
            primary,
            Some(fallback),
            retriever(vec![passage("Smith v. Jones", 0.7)], false),
        );

        let resp = wf.answer_query("q", "s5", &[]).await;

        assert_eq!(resp.answer, prompts::APOLOGY);
        assert!(resp.citations.is_empty());
        assert!(resp.answered_by.is_none());
        let hard = resp
            .notes
            .iter()
            .find(|n| n.severity == NoteSeverity::Hard)
            .unwrap();
        assert!(hard.message.starts_with("Both primary and fallback models failed"));
    }

    #[tokio::test]
    async fn apology_after_total_outage_scores_as_unmarked_text() {
        let primary = ScriptedModel::new("p", vec![Err(500), Err(500)]);
        let fallback = ScriptedModel::new("f", vec![Err(502)]);
        let wf = workflow(primary, Some(fallback), retriever(vec![], false));

        let resp = wf.answer_query("q", "s5b", &[]).await;

        assert_eq!(resp.answer, prompts::APOLOGY);
        assert_eq!(resp.model_confidence, 0.7);
        assert_eq!(resp.model_confidence_level, ConfidenceLevel::Medium);
    }

    #[tokio::test]
    async fn self_assessment_failure_uses_heuristic() {
        let primary = ScriptedModel::new(
            "p",
            vec![Ok("There is limited information on this point."), Err(429)],
        );
        let wf = workflow(primary, None, retriever(vec![], false));

        let resp = wf.answer_query("q", "s6", &[]).await;

        assert_eq!(resp.model_confidence, 0.5);
        assert_eq!(resp.notes.last().unwrap().stage, Stage::AssessConfidence);
        assert!(resp.error.unwrap().contains("Confidence assessment failed"));
    }

    #[tokio::test]
    async fn notes_join_in_stage_order() {
        let primary = ScriptedModel::new("p", vec![Err(500), Ok("Answer."), Err(500)]);
        let wf = workflow(primary, None, retriever(vec![], true));

        let history = [Turn::user("a"), Turn::assistant("b")];
        let resp = wf.answer_query("q", "s7", &history).await;

        let stages: Vec<Stage> = resp.notes.iter().map(|n| n.stage).collect();
        assert_eq!(stages, vec![Stage::Rewrite, Stage::Retrieve, Stage::AssessConfidence]);
        assert_eq!(resp.error.unwrap().matches(" | ").count(), 2);
    }

    #[tokio::test]
    async fn stored_turns_take_priority_over_caller_history() {
        let primary = ScriptedModel::new(
            "p",
            vec![Ok("A1"), Ok("HIGH"), Ok("rewritten"), Ok("A2"), Ok("HIGH")],
        );
        let wf = workflow(primary.clone(), None, retriever(vec![], false));

        wf.answer_query("Q1", "s8", &[]).await;
        wf.answer_query("Q2", "s8", &[Turn::user("ignored"), Turn::assistant("ignored")])
            .await;

        let prompts = primary.prompts.lock().unwrap();
        let rewrite = &prompts[2][0].content;
        assert!(rewrite.contains("User: Q1\nAssistant: A1"));
        assert!(!rewrite.contains("ignored"));
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        struct Stalled;

        #[async_trait]
        impl ChatModel for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String, AiError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("late".into())
            }
        }

        let wf = QueryWorkflow::new(
            ModelPair::new(Arc::new(Stalled), None),
            retriever(vec![], false),
            Arc::new(InMemorySessionStore::new()),
            ConfidenceAssessor::default(),
            WorkflowOptions {
                top_k: 5,
                call_timeout: Duration::from_millis(20),
            },
        );

        let resp = wf.answer_query("q", "s9", &[]).await;
        assert_eq!(resp.answer, prompts::APOLOGY);
        assert!(resp.error.unwrap().contains("stalled timed out"));
    }

    #[test]
    fn call_budget_covers_retries() {
        let options = WorkflowOptions::from_settings(&Settings::default());
        // 4 attempts x 30 s + 0.5 + 1 + 2 s of backoff.
        assert_eq!(options.call_timeout, Duration::from_millis(123_500));
        assert_eq!(options.top_k, 5);
    }

    #[test]
    fn call_budget_saturates_instead_of_overflowing() {
        let settings = Settings {
            request_timeout: Duration::MAX,
            ..Settings::default()
        };
        let options = WorkflowOptions::from_settings(&settings);
        assert_eq!(options.call_timeout, Duration::MAX);
    }

    #[tokio::test]
    async fn finished_sessions_release_their_lane() {
        let primary = ScriptedModel::new(
            "primary",
            vec![Ok("Answer one."), Ok("HIGH"), Ok("Answer two."), Ok("HIGH")],
        );
        let wf = workflow(primary, None, retriever(vec![], false));

        wf.answer_query("What is consideration?", "s1", &[]).await;
        wf.answer_query("What is estoppel?", "s2", &[]).await;

        assert!(wf.lanes.is_empty());
    }
}
