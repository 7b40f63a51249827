//! System knowledge-base discovery.
//!
//! One flat scan of the configured KB directory: every `.txt` file becomes
//! a system KB candidate. Subdirectories and other extensions are skipped,
//! symlinks are followed, and the directory is created when absent. The
//! one-shot load orchestration (loading/loaded flags, waiter signaling)
//! lives in the engine; this module only discovers the files.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::RagResult;

pub(crate) fn discover_kb_files(dir: &Path) -> RagResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
        .standard_filters(false)
        .follow_links(true)
        .max_depth(Some(1))
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "txt"))
        .map(|entry| entry.into_path())
        .collect();

    // Deterministic ingestion order, independent of directory enumeration.
    files.sort();
    Ok(files)
}
