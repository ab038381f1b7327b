use crate::config::{ClarificationConfig, TopicConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{BackendError, IngestError};
use crate::history::{render_turns, truncate_turns};
use crate::llm::LanguageModel;
use crate::models::{ConversationTurn, QueryResponse, RetrievalResult, SourceRef};
use crate::traits::VectorIndex;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

const GROUNDED_SYSTEM_PROMPT: &str = "You are an assistant for technical equipment documentation.\n\
\n\
Hard rules:\n\
- Answer ONLY from the documentation context supplied below; never use outside knowledge or guesses.\n\
- Never substitute one named device, board or component for another.\n\
- If the context contains ANY material relevant to the question, extract what it does say; \
do not refuse to answer just because the context is incomplete.\n\
- If the context truly contains nothing relevant, say plainly that the provided fragments \
hold no exact information on the question.\n\
- Keep answers short and specific; reproduce tables and step lists in a structured way.";

const CHITCHAT_SYSTEM_PROMPT: &str = "You are a friendly assistant for a technical-documentation \
service. Reply briefly and politely to the small talk; do not invent documentation content.";

const GENERAL_SYSTEM_PROMPT: &str = "You are a helpful assistant. The question is outside the \
indexed documentation, so answer from general knowledge, briefly, and say so if you are unsure.";

const CLARIFY_SYSTEM_PROMPT: &str = "You are a technical support assistant. The user's question \
was ambiguous. Produce two or three very short clarifying questions, one per line, at most \
seven words each, with no numbering and no explanations.";

const NOT_FOUND_ANSWER: &str =
    "No relevant documentation fragments were found for this question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    ChitChat,
    General,
    Domain,
}

/// Per-query state machine: topic gate, retrieval, grounded generation,
/// clarification decision. Holds no cross-turn state; history comes from
/// the caller.
pub struct QueryOrchestrator<V, L>
where
    V: VectorIndex,
    L: LanguageModel,
{
    provider: Arc<EmbeddingProvider>,
    index: Arc<V>,
    llm: Arc<L>,
    topics: TopicConfig,
    clarification: ClarificationConfig,
    top_k: usize,
    max_history_chars: usize,
    max_tokens: u32,
    temperature: f32,
    numbering: Regex,
}

impl<V, L> QueryOrchestrator<V, L>
where
    V: VectorIndex,
    L: LanguageModel,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<EmbeddingProvider>,
        index: Arc<V>,
        llm: Arc<L>,
        topics: TopicConfig,
        clarification: ClarificationConfig,
        top_k: usize,
        max_history_chars: usize,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            provider,
            index,
            llm,
            topics,
            clarification,
            top_k,
            max_history_chars,
            max_tokens,
            temperature,
            numbering: Regex::new(r"^[\d.\-)(\s]+")?,
        })
    }

    /// The coarse keyword gate that keeps pleasantries away from the vector
    /// store. Chit-chat wins over domain when both match, so greetings with
    /// a domain word attached still get a cheap answer.
    fn classify(&self, text: &str) -> Topic {
        let lowered = text.to_lowercase();

        if self
            .topics
            .chitchat_keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_lowercase()))
        {
            return Topic::ChitChat;
        }

        if self
            .topics
            .domain_keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_lowercase()))
        {
            return Topic::Domain;
        }

        Topic::General
    }

    pub async fn query(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse, BackendError> {
        let topic = self.classify(text);
        debug!(?topic, "query classified");

        match topic {
            Topic::ChitChat => self.direct_answer(text, history, CHITCHAT_SYSTEM_PROMPT).await,
            Topic::General => self.direct_answer(text, history, GENERAL_SYSTEM_PROMPT).await,
            Topic::Domain => self.grounded_answer(text, history).await,
        }
    }

    /// No retrieval, no sources: chit-chat and off-domain questions go
    /// straight to the model.
    async fn direct_answer(
        &self,
        text: &str,
        history: &[ConversationTurn],
        system: &str,
    ) -> Result<QueryResponse, BackendError> {
        let prompt = self.prompt_with_history(history, None, text);
        let answer = self
            .llm
            .complete(&prompt, system, self.max_tokens, self.temperature)
            .await?;

        Ok(QueryResponse {
            answer,
            sources: Vec::new(),
            relevance: 0.0,
            clarification_questions: Vec::new(),
        })
    }

    async fn grounded_answer(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse, BackendError> {
        let query_vector = self.provider.encode_query(text).await?;
        let results = self.index.search(&query_vector, self.top_k).await?;

        if results.is_empty() {
            info!("no search hits, returning fixed not-found answer");
            return Ok(QueryResponse {
                answer: NOT_FOUND_ANSWER.to_string(),
                sources: Vec::new(),
                relevance: 0.0,
                clarification_questions: Vec::new(),
            });
        }

        let relevance = mean_relevance_percent(&results);
        let context = render_context(&results);
        let prompt = self.prompt_with_history(history, Some(&context), text);

        let answer = self
            .llm
            .complete(&prompt, GROUNDED_SYSTEM_PROMPT, self.max_tokens, self.temperature)
            .await?;

        let sources = results
            .iter()
            .map(|result| SourceRef {
                file: result.fragment.source_file.clone(),
                page: result.fragment.page,
                score: round3(result.score),
            })
            .collect();

        let clarification_questions = if self.needs_clarification(&answer) {
            self.clarification_questions(text).await
        } else {
            Vec::new()
        };

        info!(relevance, hits = results.len(), "grounded answer generated");

        Ok(QueryResponse {
            answer,
            sources,
            relevance,
            clarification_questions,
        })
    }

    fn prompt_with_history(
        &self,
        history: &[ConversationTurn],
        context: Option<&str>,
        question: &str,
    ) -> String {
        let mut parts = Vec::new();

        let kept = truncate_turns(history, self.max_history_chars);
        let rendered = render_turns(kept);
        if !rendered.is_empty() {
            parts.push(format!("Conversation so far:\n{rendered}\n"));
        }

        if let Some(context) = context {
            parts.push(format!("Context from the documentation:\n{context}\n"));
        }

        parts.push(format!("Current user question:\n{question}\n"));
        parts.push("Answer:".to_string());
        parts.join("\n")
    }

    fn needs_clarification(&self, answer: &str) -> bool {
        let lowered = answer.to_lowercase();
        self.clarification
            .trigger_phrases
            .iter()
            .any(|phrase| lowered.contains(&phrase.to_lowercase()))
    }

    /// A second, cheap completion asking for 2-3 short questions the caller
    /// can offer the user. Failures degrade to an empty list; clarification
    /// is an enhancement, never a blocker.
    pub async fn clarification_questions(&self, text: &str) -> Vec<String> {
        let prompt = format!("User question: {text}\n\nClarifying questions:");

        let response = match self.llm.complete(&prompt, CLARIFY_SYSTEM_PROMPT, 200, 0.3).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "clarification generation failed");
                return Vec::new();
            }
        };

        let questions: Vec<String> = response
            .lines()
            .map(|line| self.numbering.replace(line.trim(), "").trim().to_string())
            .filter(|line| !line.is_empty())
            .filter(|line| line.split_whitespace().count() <= self.clarification.max_question_words)
            .take(self.clarification.max_questions)
            .collect();

        info!(count = questions.len(), "clarification questions generated");
        questions
    }
}

fn mean_relevance_percent(results: &[RetrievalResult]) -> f32 {
    let mean = results.iter().map(|r| r.score as f64).sum::<f64>() / results.len() as f64;
    ((mean * 1000.0).round() / 10.0) as f32
}

fn round3(score: f32) -> f32 {
    ((score as f64 * 1000.0).round() / 1000.0) as f32
}

fn render_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            format!(
                "[Source {}: {}, page {}]\n{}",
                index + 1,
                result.fragment.source_file,
                result.fragment.page,
                result.fragment.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
