// Answer pipeline module
// Three layers: policy prompt, retrieved-context injection, citation gate


// Private on purpose: the generation client is only reachable through
// `AnswerPipeline::answer`, so no code path can bypass the citation gate.
mod generation;

pub use generation::{ChatMessage, GenerationError};

use anyhow::Result;
use fancy_regex::Regex;
use itertools::Itertools;
use std::sync::{Arc, LazyLock};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::{BusinessConfig, Config, RagConfig, Tone};
use crate::database::sqlite::{ConversationMessage, Database, MessageRole, UnansweredQueries};
use crate::database::vector_index::IndexError;
use crate::embeddings::EmbeddingError;
use crate::indexer::Indexer;
use crate::retrieval::{RetrievedChunk, Retriever};

static CITATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:source|מקור):[ \t]*(.+)").expect("citation pattern is valid"));

/// Why a turn resolved to the fallback answer. Distinguished for logs only;
/// the user-visible text is identical for every cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCause {
    RetrievalError,
    GenerationError,
    CitationMissing,
}

// Per-turn phases, surfaced through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Received,
    Retrieving,
    NoContext,
    ContextFound,
    Generating,
    Answered,
    FallbackAnswered,
}

/// What the caller shows the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub cited: bool,
    pub source_labels: Vec<String>,
}

/// Layer C: the syntactic citation check. A generated answer passes only
/// when it carries a source marker referencing one of the supplied labels —
/// with no labels supplied it can never pass. This is a cheap guardrail,
/// not a semantic fact-check.
pub struct CitationGate;

impl CitationGate {
    /// The labels the answer cites, or `None` when the gate fails.
    #[inline]
    pub fn verdict(answer: &str, labels: &[String]) -> Option<Vec<String>> {
        let captures = CITATION_PATTERN.captures(answer).ok().flatten()?;
        let cited_text = captures.get(1)?.as_str().trim();
        if cited_text.is_empty() || labels.is_empty() {
            return None;
        }

        let cited_lower = cited_text
            .trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace())
            .to_lowercase();
        if cited_lower.is_empty() {
            return None;
        }

        let matched: Vec<String> = labels
            .iter()
            .filter(|label| {
                let label_lower = label.to_lowercase();
                cited_lower.contains(&label_lower) || label_lower.contains(&cited_lower)
            })
            .cloned()
            .collect();

        if matched.is_empty() { None } else { Some(matched) }
    }

    /// Remove citation lines before the answer is shown; the marker is an
    /// internal verification detail, not customer-facing text.
    #[inline]
    pub fn strip(answer: &str) -> String {
        answer
            .lines()
            .filter(|line| !matches!(CITATION_PATTERN.is_match(line), Ok(true)))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

/// Turns (query, history, retrieved context) into the response a user is
/// shown, enforcing groundedness end to end.
pub struct AnswerPipeline {
    business: BusinessConfig,
    rag: RagConfig,
    history_limit: usize,
    database: Database,
    indexer: Arc<Indexer>,
    retriever: Retriever,
    client: generation::ChatClient,
    limiter: Arc<Semaphore>,
}

impl AnswerPipeline {
    #[inline]
    pub fn new(config: &Config, database: Database, indexer: Arc<Indexer>) -> Self {
        let retriever = Retriever::new(indexer.strategy(), indexer.shared());

        Self {
            business: config.business.clone(),
            rag: config.rag.clone(),
            history_limit: config.pipeline.history_limit,
            database,
            indexer,
            retriever,
            client: generation::ChatClient::new(&config.openai),
            limiter: Arc::new(Semaphore::new(config.pipeline.max_concurrent_llm_calls)),
        }
    }

    /// The single entry point for answering a user turn. Every operational
    /// failure — generation errors, missing citations, absent context —
    /// resolves to either a grounded answer or the fixed fallback text;
    /// contract violations (e.g. mismatched embedding strategies) propagate.
    #[inline]
    pub async fn answer(
        &self,
        query: &str,
        user_id: &str,
        history: &[ConversationMessage],
    ) -> Result<Answer> {
        debug!(phase = ?TurnPhase::Received, user_id, "Handling user turn");

        debug!(phase = ?TurnPhase::Retrieving, user_id, "Retrieving context");
        let retrieved = match self.retrieve_context(query).await {
            Ok(retrieved) => retrieved,
            // Contract violations (strategy/dimension mismatch) propagate;
            // masking them risks serving wrong results silently. Ordinary
            // operational failures resolve to the fallback like any other
            // "no good answer" outcome.
            Err(e) if is_contract_violation(&e) => return Err(e),
            Err(e) => {
                error!(
                    cause = "retrieval_error",
                    user_id,
                    error = %e,
                    "Retrieval failed; serving fallback"
                );
                return self
                    .fallback(query, user_id, FallbackCause::RetrievalError)
                    .await;
            }
        };

        if retrieved.is_empty() {
            debug!(phase = ?TurnPhase::NoContext, user_id, "No relevant knowledge found");
        } else {
            debug!(
                phase = ?TurnPhase::ContextFound,
                user_id,
                chunks = retrieved.len(),
                "Context retrieved"
            );
        }

        let labels: Vec<String> = retrieved
            .iter()
            .map(|c| c.source_label.clone())
            .unique()
            .collect();
        let messages = self.build_messages(query, &retrieved, history);

        debug!(phase = ?TurnPhase::Generating, user_id, "Calling generation model");
        match self.generate(messages).await {
            Ok(raw_answer) => match CitationGate::verdict(&raw_answer, &labels) {
                Some(cited_labels) => {
                    info!(phase = ?TurnPhase::Answered, user_id, sources = ?cited_labels, "Turn answered");
                    Ok(Answer {
                        text: CitationGate::strip(&raw_answer),
                        cited: true,
                        source_labels: cited_labels,
                    })
                }
                None => {
                    // The raw answer is logged for operators, never shown.
                    warn!(
                        cause = "citation_missing",
                        user_id,
                        discarded = %preview(&raw_answer),
                        "Quality gate failed; serving fallback"
                    );
                    self.fallback(query, user_id, FallbackCause::CitationMissing)
                        .await
                }
            },
            Err(generation_error) => {
                error!(
                    cause = "generation_error",
                    user_id,
                    error = %generation_error,
                    "Generation failed; serving fallback"
                );
                self.fallback(query, user_id, FallbackCause::GenerationError)
                    .await
            }
        }
    }

    async fn retrieve_context(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        // A failed freshness reaction (e.g. rebuild without credentials)
        // degrades to serving the current index, mirroring the warn policy.
        let serveable = match self.indexer.ensure_fresh().await {
            Ok(serveable) => serveable,
            Err(e) => {
                warn!(
                    "Staleness reaction failed ({}); continuing with current index",
                    e
                );
                true
            }
        };

        if !serveable {
            return Ok(Vec::new());
        }

        self.retriever
            .retrieve(query, self.rag.top_k, self.rag.min_similarity)
            .await
    }

    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String, GenerationError> {
        // The semaphore bounds concurrent outbound calls; spawn_blocking
        // keeps the blocking HTTP call off the async executor so one slow
        // generation cannot stall other conversations.
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| GenerationError::Transport("worker pool closed".to_string()))?;

        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.complete(&messages))
            .await
            .map_err(|e| GenerationError::Transport(format!("generation task failed: {}", e)))?
    }

    async fn fallback(
        &self,
        query: &str,
        user_id: &str,
        cause: FallbackCause,
    ) -> Result<Answer> {
        info!(phase = ?TurnPhase::FallbackAnswered, user_id, ?cause, "Serving fallback answer");

        // Knowledge-gap capture; a storage hiccup must not break the turn.
        if let Err(e) = UnansweredQueries::record(self.database.pool(), user_id, "", query).await {
            warn!("Failed to record unanswered question: {}", e);
        }

        Ok(Answer {
            text: self.business.fallback_response.clone(),
            cited: false,
            source_labels: Vec::new(),
        })
    }

    fn build_messages(
        &self,
        query: &str,
        retrieved: &[RetrievedChunk],
        history: &[ConversationMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 3);

        // Layer A: the fixed behavioral contract.
        messages.push(ChatMessage::system(system_prompt(&self.business)));

        // Layer B: retrieved context as the only permissible source of facts.
        messages.push(ChatMessage::system(context_message(retrieved)));

        // Bounded history keeps prompt growth capped.
        let tail_start = history.len().saturating_sub(self.history_limit);
        for message in &history[tail_start..] {
            messages.push(match message.role {
                MessageRole::User => ChatMessage::user(message.message.clone()),
                MessageRole::Assistant => ChatMessage::assistant(message.message.clone()),
            });
        }

        messages.push(ChatMessage::user(query));
        messages
    }
}

/// Layer A: immutable per business configuration, never user-influenceable.
#[inline]
pub fn system_prompt(business: &BusinessConfig) -> String {
    let (style, tone_rule) = match business.tone {
        Tone::Friendly => (
            "friendly and professional",
            "Be warm, helpful, and concise. Use a conversational tone.",
        ),
        Tone::Formal => (
            "professional",
            "Maintain a courteous, precise tone. Avoid slang and exclamations.",
        ),
    };

    format!(
        "You are a {style} customer service representative for {name}.\n\n\
         RULES — follow these strictly:\n\
         1. ONLY answer based on the provided context information. NEVER make up information.\n\
         2. If the context does not contain enough information to answer, say that you don't \
         have that information and offer to connect the customer with a human agent.\n\
         3. Always cite your source at the end of your answer using the format: \
         Source: [category — title]\n\
         4. {tone_rule}\n\
         5. If the customer seems frustrated or asks to speak to a person, offer the human \
         handoff.\n\
         6. Keep answers focused and under 200 words unless more detail is specifically \
         requested.\n\
         7. Respond in the same language the customer uses.",
        style = style,
        name = business.name,
        tone_rule = tone_rule,
    )
}

fn context_message(retrieved: &[RetrievedChunk]) -> String {
    let context = if retrieved.is_empty() {
        "No relevant information found in the knowledge base.".to_string()
    } else {
        retrieved
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                format!(
                    "--- Context {} (Source: {}) ---\n{}",
                    i + 1,
                    chunk.source_label,
                    chunk.text
                )
            })
            .join("\n\n")
    };

    format!(
        "Context information (use ONLY this information to answer the customer's question):\n\n\
         {context}\n\n\
         Important: base your answer only on the information above. Always end your answer \
         with 'Source: [source name]' naming the context you used."
    )
}

fn is_contract_violation(error: &anyhow::Error) -> bool {
    error.downcast_ref::<IndexError>().is_some()
        || matches!(
            error.downcast_ref::<EmbeddingError>(),
            Some(EmbeddingError::DimensionMismatch { .. })
        )
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
