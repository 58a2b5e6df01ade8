/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Include file resolution.
//!
//! This module provides the trait and implementations for locating the
//! templates named by `include(...)` and `rebase(...)` calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::TemplateResult;

/// A located include: its resolved path and source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub path: PathBuf,
    pub source: String,
}

/// Trait for loading included templates.
///
/// Implementations search `dirs` in order and return the first match. The
/// returned path is used as the cache key and as the base directory for
/// includes made from the loaded template.
pub trait IncludeResolver {
    /// Load a template by name, or `None` if no directory has it.
    fn load(&self, name: &str, dirs: &[PathBuf]) -> TemplateResult<Option<Loaded>>;
}

/// Resolver that loads includes from the filesystem.
///
/// Absolute names are used as-is; relative names are joined to each search
/// directory in turn.
#[derive(Debug, Clone, Default)]
pub struct FileSystemResolver;

impl IncludeResolver for FileSystemResolver {
    fn load(&self, name: &str, dirs: &[PathBuf]) -> TemplateResult<Option<Loaded>> {
        let requested = Path::new(name);
        let candidates: Vec<PathBuf> = if requested.is_absolute() {
            vec![requested.to_path_buf()]
        } else {
            dirs.iter().map(|dir| dir.join(requested)).collect()
        };
        for path in candidates {
            if path.is_file() {
                let source = std::fs::read_to_string(&path)?;
                return Ok(Some(Loaded { path, source }));
            }
        }
        Ok(None)
    }
}

/// Resolver that serves includes from an in-memory map.
///
/// Useful for tests and for embedding templates in an application. Names
/// are matched exactly; search directories are ignored.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    templates: HashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template under `name`.
    pub fn add(&mut self, name: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), content.into());
        self
    }

    /// Create a resolver with the given templates.
    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut resolver = Self::new();
        for (name, content) in templates {
            resolver.add(name, content);
        }
        resolver
    }
}

impl IncludeResolver for MemoryResolver {
    fn load(&self, name: &str, _dirs: &[PathBuf]) -> TemplateResult<Option<Loaded>> {
        Ok(self.templates.get(name).map(|source| Loaded {
            path: PathBuf::from(name),
            source: source.clone(),
        }))
    }
}

/// Search order for an include made from a template in `current_dir`:
/// that directory first, then the configured directories, without repeats.
pub fn search_dirs(current_dir: Option<&Path>, configured: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::with_capacity(configured.len() + 1);
    for dir in current_dir.map(Path::to_path_buf).into_iter().chain(configured.iter().cloned()) {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_resolver() {
        let resolver = MemoryResolver::with_templates([("base.inp", "x = {x}")]);
        let loaded = resolver.load("base.inp", &[]).unwrap().unwrap();
        assert_eq!(loaded.source, "x = {x}");
        assert!(resolver.load("other.inp", &[]).unwrap().is_none());
    }

    #[test]
    fn test_filesystem_search_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("inc.inp"), "second").unwrap();
        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let loaded = FileSystemResolver.load("inc.inp", &dirs).unwrap().unwrap();
        assert_eq!(loaded.source, "second");

        std::fs::write(first.path().join("inc.inp"), "first").unwrap();
        let loaded = FileSystemResolver.load("inc.inp", &dirs).unwrap().unwrap();
        assert_eq!(loaded.source, "first");
        assert!(FileSystemResolver.load("missing.inp", &dirs).unwrap().is_none());
    }

    #[test]
    fn test_search_dirs_deduplicates() {
        let here = PathBuf::from("/a");
        let dirs = search_dirs(Some(&here), &[PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
