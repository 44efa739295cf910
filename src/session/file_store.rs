//! File-backed session store
//!
//! One pretty-printed JSON document per session under `<dir>/<id>.json`.
//! Writes go to a temp file that is then renamed over the target, so a
//! reader sees either the old record or the new one, never a partial write.
//! A process-wide mutex serializes read-modify-write cycles.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use chrono::Utc;

use crate::error::{OrchestratorError, Result};
use crate::session::model::{Session, SessionId};
use crate::session::store::{paginate, SessionFilter, SessionStore};

/// Session store persisting each record as its own JSON file.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create session directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the session files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// A file that vanished before it could be read is reported as absent.
    fn read_path(path: &Path) -> anyhow::Result<Option<Session>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let session = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(session))
    }

    /// Atomically write a session (write to temp, then rename).
    fn write(&self, session: &Session) -> anyhow::Result<()> {
        let path = self.path_for(session.id);
        let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes())
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!("Failed to rename {} -> {}", tmp_path.display(), path.display())
        })?;
        Ok(())
    }

    fn read_all(&self) -> anyhow::Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?;
        for entry in entries {
            let path = entry.context("Failed to read directory entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(session) = Self::read_path(&path)? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

impl SessionStore for FileStore {
    fn insert(&self, session: &Session) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.path_for(session.id).exists() {
            return Err(OrchestratorError::invalid_state(format!(
                "session {} already exists",
                session.id
            )));
        }
        self.write(session)?;
        Ok(())
    }

    fn get(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(Self::read_path(&self.path_for(id))?)
    }

    fn update(
        &self,
        id: SessionId,
        mutate: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut session = Self::read_path(&self.path_for(id))?
            .ok_or_else(|| OrchestratorError::not_found(format!("session {id}")))?;
        mutate(&mut session)?;
        session.updated_at = Utc::now();
        self.write(&session)?;
        Ok(session)
    }

    fn delete(&self, id: SessionId) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete {}", path.display()))
                .map_err(Into::into),
        }
    }

    fn list(
        &self,
        filter: &SessionFilter<'_>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Session>> {
        Ok(paginate(self.read_all()?, filter, offset, limit))
    }
}
