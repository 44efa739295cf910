//! Session store abstraction and the in-memory store
//!
//! Every executor mutation goes through [`SessionStore::update`], a single
//! atomic read-modify-write. Readers never observe a half-applied mutation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::error::{OrchestratorError, Result};
use crate::session::model::{Session, SessionId};

/// Restricts which sessions `list` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter<'a> {
    /// Only sessions of this feature kind
    pub kind: Option<&'a str>,
    /// Only sessions owned by this user
    pub owner: Option<&'a str>,
}

impl SessionFilter<'_> {
    /// Whether a session passes the filter.
    #[must_use]
    pub fn matches(&self, session: &Session) -> bool {
        self.kind.map_or(true, |k| session.kind == k)
            && self.owner
                .map_or(true, |o| session.owner_id.as_deref() == Some(o))
    }
}

/// Durable record of sessions. Owned exclusively by the orchestrator.
pub trait SessionStore: Send + Sync {
    /// Persist a new session. Fails if the id already exists.
    fn insert(&self, session: &Session) -> Result<()>;

    /// Fetch a session by id.
    fn get(&self, id: SessionId) -> Result<Option<Session>>;

    /// Atomically apply `mutate` to the stored record and persist it.
    ///
    /// `updated_at` is refreshed after `mutate` runs. If `mutate` returns an
    /// error nothing is written. An absent record yields `NotFound`; a
    /// missing record is never re-created.
    fn update(
        &self,
        id: SessionId,
        mutate: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session>;

    /// Remove a session and its sub-results. Returns whether it existed.
    fn delete(&self, id: SessionId) -> Result<bool>;

    /// Sessions passing `filter`, newest first, skipping `offset`.
    fn list(&self, filter: &SessionFilter<'_>, offset: usize, limit: usize)
        -> Result<Vec<Session>>;
}

/// Order newest first, id as tiebreak so pages are stable.
pub(crate) fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Apply filter, ordering and pagination to a full scan.
pub(crate) fn paginate(
    mut sessions: Vec<Session>,
    filter: &SessionFilter<'_>,
    offset: usize,
    limit: usize,
) -> Vec<Session> {
    sessions.retain(|s| filter.matches(s));
    sort_newest_first(&mut sessions);
    sessions.into_iter().skip(offset).take(limit).collect()
}

/// Process-local store backed by a `HashMap` under a lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn insert(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session.id) {
            return Err(OrchestratorError::invalid_state(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(&id).cloned())
    }

    fn update(
        &self,
        id: SessionId,
        mutate: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let stored = sessions
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::not_found(format!("session {id}")))?;

        // Mutate a copy so a rejected mutation leaves the record untouched
        let mut draft = stored.clone();
        mutate(&mut draft)?;
        draft.updated_at = Utc::now();
        *stored = draft.clone();
        Ok(draft)
    }

    fn delete(&self, id: SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.remove(&id).is_some())
    }

    fn list(
        &self,
        filter: &SessionFilter<'_>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(paginate(
            sessions.values().cloned().collect(),
            filter,
            offset,
            limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{RunId, SessionStatus};
    use chrono::Duration;
    use serde_json::json;

    fn session_at(kind: &str, owner: Option<&str>, minutes_ago: i64) -> Session {
        let mut s = Session::new(kind, owner.map(String::from), json!({}), RunId::new());
        s.created_at = Utc::now() - Duration::minutes(minutes_ago);
        s
    }

    #[test]
    fn test_insert_and_get() {
        let store = MemoryStore::new();
        let session = session_at("ideation", None, 0);
        store.insert(&session).unwrap();

        let fetched = store.get(session.id).unwrap().unwrap();
        assert_eq!(fetched, session);
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let store = MemoryStore::new();
        let session = session_at("ideation", None, 0);
        store.insert(&session).unwrap();
        assert!(store.insert(&session).is_err());
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get(SessionId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_applies_mutation() {
        let store = MemoryStore::new();
        let session = session_at("ideation", None, 0);
        store.insert(&session).unwrap();

        let updated = store
            .update(session.id, &mut |s| {
                s.progress_step = 3;
                Ok(())
            })
            .unwrap();

        assert_eq!(updated.progress_step, 3);
        assert_eq!(store.get(session.id).unwrap().unwrap().progress_step, 3);
        assert!(updated.updated_at >= session.updated_at);
    }

    #[test]
    fn test_rejected_update_writes_nothing() {
        let store = MemoryStore::new();
        let session = session_at("ideation", None, 0);
        store.insert(&session).unwrap();

        let err = store
            .update(session.id, &mut |s| {
                s.status = SessionStatus::Failed;
                Err(OrchestratorError::invalid_state("nope"))
            })
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidState(_)));
        assert_eq!(
            store.get(session.id).unwrap().unwrap().status,
            SessionStatus::Pending
        );
    }

    #[test]
    fn test_update_missing_is_not_found_and_does_not_create() {
        let store = MemoryStore::new();
        let id = SessionId::new();
        let err = store.update(id, &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let session = session_at("ideation", None, 0);
        store.insert(&session).unwrap();

        assert!(store.delete(session.id).unwrap());
        assert!(!store.delete(session.id).unwrap());
    }

    #[test]
    fn test_list_newest_first_with_pagination() {
        let store = MemoryStore::new();
        let oldest = session_at("ideation", None, 30);
        let middle = session_at("ideation", None, 20);
        let newest = session_at("ideation", None, 10);
        for s in [&middle, &oldest, &newest] {
            store.insert(s).unwrap();
        }

        let filter = SessionFilter::default();
        let page = store.list(&filter, 0, 2).unwrap();
        assert_eq!(
            page.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![newest.id, middle.id]
        );

        let page = store.list(&filter, 2, 2).unwrap();
        assert_eq!(page.iter().map(|s| s.id).collect::<Vec<_>>(), vec![oldest.id]);

        assert!(store.list(&filter, 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_list_filters_kind_and_owner() {
        let store = MemoryStore::new();
        store.insert(&session_at("ideation", Some("alice"), 1)).unwrap();
        store.insert(&session_at("ideation", Some("bob"), 2)).unwrap();
        store.insert(&session_at("test-script", Some("alice"), 3)).unwrap();

        let by_kind = SessionFilter {
            kind: Some("ideation"),
            owner: None,
        };
        assert_eq!(store.list(&by_kind, 0, 10).unwrap().len(), 2);

        let by_both = SessionFilter {
            kind: Some("ideation"),
            owner: Some("alice"),
        };
        let page = store.list(&by_both, 0, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].owner_id.as_deref(), Some("alice"));
    }
}
