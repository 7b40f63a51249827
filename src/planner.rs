//! Retrieval planning.
//!
//! SINGLE mode searches the active KB; MULTI mode fans out over a snapshot
//! of the merged view, one blocking task per KB, and merges. A failing
//! per-KB search is logged and contributes nothing; it never fails the
//! query. Matches below the relevance threshold are dropped, the remainder
//! is ranked by descending score (ties: KB name, then chunk id) and capped,
//! and the survivors are rendered into the prompt context block.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{RagError, RagResult};
use crate::registry::KnowledgeBase;

/// Context-block heading fragments. The rendered shape is part of the
/// engine's contract with the prompt templates, so these stay frozen.
const CITATION_LABEL: &str = "引用";
const KB_LABEL: &str = "知识库";
const SCORE_LABEL: &str = "相关度";

/// Reference excerpts are capped at this many characters.
const EXCERPT_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub content: String,
    pub score: f32,
    pub kb_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub id: u32,
    pub score: f32,
    pub kb: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub match_count: usize,
    pub kb_single: Option<String>,
    pub kb_multi: Vec<String>,
    /// Same order as `QueryResult::documents`.
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Formatted context block handed to the LLM prompt.
    pub context: String,
    /// Matches in the same order the context block cites them.
    pub documents: Vec<Match>,
    pub metadata: QueryMetadata,
}

struct Candidate {
    kb_name: String,
    chunk_id: u32,
    score: f32,
    content: String,
}

pub(crate) fn single_mode(
    kb: &Arc<KnowledgeBase>,
    query_vec: &[f32],
    max_docs: usize,
    min_score: f32,
) -> RagResult<QueryResult> {
    let hits = kb.index.top_k(query_vec, max_docs);
    let candidates = collect(kb, hits, min_score);
    if candidates.is_empty() {
        return Err(RagError::NoRelevantContent);
    }
    Ok(assemble(candidates, Some(kb.name.clone()), vec![]))
}

pub(crate) async fn multi_mode(
    kbs: &[Arc<KnowledgeBase>],
    query_vec: &[f32],
    max_docs: usize,
    min_score: f32,
    cancel: Option<&CancellationToken>,
) -> RagResult<QueryResult> {
    let names: Vec<String> = kbs.iter().map(|kb| kb.name.clone()).collect();

    // One blocking task per KB: the scans run in parallel and a panicking
    // index surfaces as a JoinError for that KB alone.
    let joined = join_all(kbs.iter().map(|kb| {
        let kb = kb.clone();
        let query = query_vec.to_vec();
        tokio::task::spawn_blocking(move || kb.index.top_k(&query, max_docs))
    }));

    let outcomes = match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RagError::Cancelled),
            outcomes = joined => outcomes,
        },
        None => joined.await,
    };

    let mut candidates = Vec::new();
    for (kb, outcome) in kbs.iter().zip(outcomes) {
        match outcome {
            Ok(hits) => candidates.extend(collect(kb, hits, min_score)),
            Err(err) => {
                warn!(kb = %kb.name, "Per-KB search failed, dropping its results: {err}");
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.kb_name.cmp(&b.kb_name))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(max_docs);

    if candidates.is_empty() {
        return Err(RagError::NoRelevantContent);
    }
    Ok(assemble(candidates, None, names))
}

fn collect(kb: &Arc<KnowledgeBase>, hits: Vec<(u32, f32)>, min_score: f32) -> Vec<Candidate> {
    hits.into_iter()
        .filter(|(_, score)| *score >= min_score)
        .filter_map(|(id, score)| {
            kb.index.chunk(id).map(|chunk| Candidate {
                kb_name: kb.name.clone(),
                chunk_id: id,
                score,
                content: chunk.content.clone(),
            })
        })
        .collect()
}

fn assemble(
    candidates: Vec<Candidate>,
    kb_single: Option<String>,
    kb_multi: Vec<String>,
) -> QueryResult {
    let mut context = String::new();
    let mut documents = Vec::with_capacity(candidates.len());
    let mut references = Vec::with_capacity(candidates.len());

    for (i, candidate) in candidates.into_iter().enumerate() {
        let ordinal = i + 1;
        let percent = candidate.score * 100.0;
        context.push_str(&format!(
            "\n{CITATION_LABEL} {ordinal} ({KB_LABEL}: {kb}, {SCORE_LABEL}: {percent:.1}%):\n{content}\n",
            kb = candidate.kb_name,
            content = candidate.content,
        ));
        references.push(Reference {
            id: candidate.chunk_id,
            score: candidate.score,
            kb: candidate.kb_name.clone(),
            excerpt: candidate.content.chars().take(EXCERPT_CHARS).collect(),
        });
        documents.push(Match {
            content: candidate.content,
            score: candidate.score,
            kb_name: candidate.kb_name,
        });
    }

    QueryResult {
        context,
        metadata: QueryMetadata {
            match_count: documents.len(),
            kb_single,
            kb_multi,
            references,
        },
        documents,
    }
}
