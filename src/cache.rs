//! Fachada de cache usada pelos serviços vizinhos.
//!
//! O orquestrador só invalida o cache depois de uma execução bem-sucedida,
//! para que leituras posteriores reflitam os novos lançamentos.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::CacheError;

pub trait CacheFacade: Send + Sync {
    /// Remove todas as entradas. Retorna quantas foram removidas.
    fn invalidate_all(&self) -> Result<usize, CacheError>;
}

/// Cache persistente em disco: um arquivo `*.json` por chave.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    dir: PathBuf,
}

impl DirectoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CacheFacade for DirectoryCache {
    fn invalidate_all(&self) -> Result<usize, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        tracing::info!(dir = %self.dir.display(), removed, "cache invalidated");
        Ok(removed)
    }
}
