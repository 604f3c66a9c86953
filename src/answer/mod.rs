// Retrieval-augmented answering
// selection -> namespace -> query vector -> nearest entries -> context -> completion


use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::completion::{ChatModel, SYSTEM_PROMPT, build_user_prompt};
use crate::database::{QueryMatch, VectorIndex};
use crate::embeddings::Embedder;
use crate::namespace::{Namespace, resolve_namespace};
use crate::{ErrorKind, RagError};

/// Stages of one answer request. `Failed` can follow any stage after `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    Idle,
    Resolving,
    Embedding,
    Querying,
    Composing,
    Generating,
    Done,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Embedding => "embedding",
            Self::Querying => "querying",
            Self::Composing => "composing",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub namespace: Namespace,
    /// Newline-joined text of the matches that carried any
    pub context: String,
    pub matches: Vec<QueryMatch>,
}

/// Why a request stopped and where.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail} (while {state})")]
pub struct FlowFailure {
    pub kind: ErrorKind,
    /// The stage that failed
    pub state: FlowState,
    pub detail: String,
}

impl FlowFailure {
    fn new(state: FlowState, error: &RagError) -> Self {
        Self {
            kind: error.kind(),
            state,
            detail: error.to_string(),
        }
    }
}

pub type Outcome = std::result::Result<Answer, FlowFailure>;

/// Join the `text` metadata of `matches` with newlines, skipping matches without one.
#[inline]
pub fn compose_context(matches: &[QueryMatch]) -> String {
    matches.iter().filter_map(QueryMatch::text).join("\n")
}

pub struct AnswerFlow {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
}

impl AnswerFlow {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chat,
            top_k: top_k.max(1),
        }
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer `query` from the partition selected by `level` and `mode`.
    pub async fn run(&self, level: &str, mode: &str, query: &str) -> Outcome {
        let mut state = FlowState::Resolving;
        debug!("Answer flow: {}", state);

        let fail = |state: FlowState, error: RagError| {
            warn!("Answer flow failed while {}: {}", state, error);
            FlowFailure::new(state, &error)
        };

        let namespace = resolve_namespace(level, mode).map_err(|e| fail(state, e))?;
        let query = query.trim();
        if query.is_empty() {
            return Err(fail(state, RagError::EmptyQuery));
        }

        state = FlowState::Embedding;
        debug!("Answer flow: {} ({})", state, namespace);
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| fail(state, e))?;

        state = FlowState::Querying;
        debug!("Answer flow: {}", state);
        let matches = self
            .index
            .query(&namespace, &vector, self.top_k, true)
            .await
            .map_err(|e| fail(state, e))?;

        state = FlowState::Composing;
        debug!("Answer flow: {} ({} matches)", state, matches.len());
        let context = compose_context(&matches);

        state = FlowState::Generating;
        debug!("Answer flow: {}", state);
        let prompt = build_user_prompt(&context, query);
        let text = self
            .chat
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| fail(state, e))?;

        info!(
            "Answered query in {} from {} matches",
            namespace,
            matches.len()
        );

        Ok(Answer {
            text,
            namespace,
            context,
            matches,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub namespace: Namespace,
    pub query: String,
    pub answer: String,
}

/// Append-only log of the exchanges in one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: Vec<Exchange>,
}

impl History {
    fn push(&mut self, exchange: Exchange) {
        self.entries.push(exchange);
    }

    /// Oldest first
    #[inline]
    pub fn entries(&self) -> &[Exchange] {
        &self.entries
    }

    /// Newest first
    #[inline]
    pub fn recent(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter().rev()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One user's interactive session; queries run one at a time.
pub struct Session {
    flow: AnswerFlow,
    history: History,
    state: FlowState,
}

impl Session {
    #[inline]
    pub fn new(flow: AnswerFlow) -> Self {
        Self {
            flow,
            history: History::default(),
            state: FlowState::Idle,
        }
    }

    /// Run one request; the history grows only when it succeeds.
    pub async fn submit(&mut self, level: &str, mode: &str, query: &str) -> Outcome {
        let outcome = self.flow.run(level, mode, query).await;
        match &outcome {
            Ok(answer) => {
                self.history.push(Exchange {
                    namespace: answer.namespace.clone(),
                    query: query.trim().to_string(),
                    answer: answer.text.clone(),
                });
                self.state = FlowState::Done;
            }
            Err(_) => self.state = FlowState::Failed,
        }
        outcome
    }

    #[inline]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Terminal state of the last request, `Idle` before the first
    #[inline]
    pub fn state(&self) -> FlowState {
        self.state
    }
}
