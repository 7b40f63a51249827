//! Knowledge-base ingestion.
//!
//! Read the source file, chunk it, embed the chunks batch by batch (at most
//! one provider request in flight), and assemble the immutable vector
//! index. Runs entirely outside the engine mutex; the caller commits the
//! finished KB under the lock afterwards.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunker::Splitter;
use crate::config::EngineConfig;
use crate::embedder::EmbeddingAdapter;
use crate::error::{RagError, RagResult};
use crate::index::VectorIndex;
use crate::registry::{KbOrigin, KnowledgeBase};

/// KB name derived from a path: file basename without its extension.
pub(crate) fn kb_name_from_path(path: &Path) -> RagResult<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            RagError::InvalidArgument(format!(
                "cannot derive a knowledge-base name from '{}'",
                path.display()
            ))
        })
}

pub(crate) async fn build_kb(
    path: &Path,
    origin: KbOrigin,
    config: &EngineConfig,
    splitter: &dyn Splitter,
    adapter: &EmbeddingAdapter,
    cancel: Option<&CancellationToken>,
) -> RagResult<KnowledgeBase> {
    let canonical = dunce::canonicalize(path)?;
    let name = kb_name_from_path(&canonical)?;
    let text = tokio::fs::read_to_string(&canonical).await?;

    let pieces = splitter.split(&text, config.chunk_size, config.chunk_overlap);
    debug!(
        kb = %name,
        path = %canonical.display(),
        chunks = pieces.len(),
        "Chunked knowledge base source"
    );

    let texts: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
    let embeddings = adapter.embed_batch(&texts, cancel).await?;

    let dim = adapter.dim().unwrap_or(0);
    let mut index = VectorIndex::new(dim);
    for (piece, embedding) in pieces.into_iter().zip(embeddings) {
        index.push(piece.content, embedding, Some(piece.range));
    }

    Ok(KnowledgeBase {
        name,
        source_path: canonical.to_string_lossy().to_string(),
        index: std::sync::Arc::new(index),
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::chunker::RecursiveSplitter;
    use crate::embedder::HashEmbedder;

    fn adapter() -> EmbeddingAdapter {
        EmbeddingAdapter::new(Arc::new(HashEmbedder::new(16)), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_chunk_count_matches_splitter_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let text = "First paragraph of notes.\n\nSecond paragraph, somewhat longer, \
                    with several sentences. It keeps going for a while to force \
                    more than one chunk out of the splitter."
            .repeat(4);
        std::fs::write(&path, &text).unwrap();

        let config = EngineConfig {
            chunk_size: 80,
            chunk_overlap: 10,
            ..Default::default()
        };
        let splitter = RecursiveSplitter;
        let kb = build_kb(&path, KbOrigin::User, &config, &splitter, &adapter(), None)
            .await
            .unwrap();

        assert_eq!(kb.name, "notes");
        assert_eq!(
            kb.index.chunk_count(),
            splitter.split(&text, 80, 10).len()
        );
        assert!(kb.index.chunk_count() > 1);
    }

    #[tokio::test]
    async fn test_empty_file_builds_empty_kb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();

        let kb = build_kb(
            &path,
            KbOrigin::System,
            &EngineConfig::default(),
            &RecursiveSplitter,
            &adapter(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(kb.index.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = build_kb(
            Path::new("/definitely/not/here.txt"),
            KbOrigin::User,
            &EngineConfig::default(),
            &RecursiveSplitter,
            &adapter(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RagError::Io(_)));
    }

    #[test]
    fn test_name_strips_extension_only() {
        assert_eq!(
            kb_name_from_path(Path::new("/kb/agent-article.txt")).unwrap(),
            "agent-article"
        );
        assert_eq!(
            kb_name_from_path(Path::new("notes.backup.txt")).unwrap(),
            "notes.backup"
        );
    }
}
