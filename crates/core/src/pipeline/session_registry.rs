use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::info;

use crate::pipeline::session::SessionHandle;
use crate::shared::config::ProctorConfig;

type SessionKey = (String, String);

/// Session handles keyed by student and exam.
///
/// Handles are created on first use and shared; the map lock is only held
/// while looking a handle up, never while a frame is processed.
pub struct SessionRegistry {
    config: ProctorConfig,
    sessions: RwLock<HashMap<SessionKey, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(config: ProctorConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn session(&self, student_id: &str, exam_id: &str) -> Arc<SessionHandle> {
        let key = (student_id.to_string(), exam_id.to_string());
        if let Some(handle) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(handle);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(key).or_insert_with(|| {
            info!("Opening session for student {student_id} exam {exam_id}");
            Arc::new(SessionHandle::new(student_id, exam_id, &self.config))
        }))
    }

    /// Resets an existing session. Returns false if there was none.
    pub fn reset(&self, student_id: &str, exam_id: &str) -> bool {
        match self.get(student_id, exam_id) {
            Some(handle) => {
                handle.reset();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, student_id: &str, exam_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(student_id.to_string(), exam_id.to_string()))
    }

    pub fn get(&self, student_id: &str, exam_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(student_id.to_string(), exam_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(ProctorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_same_key_returns_same_handle() {
        let registry = SessionRegistry::default();
        let a = registry.session("s1", "e1");
        let b = registry.session("s1", "e1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sessions_are_isolated_by_student_and_exam() {
        let registry = SessionRegistry::default();
        let a = registry.session("s1", "e1");
        let b = registry.session("s1", "e2");
        let c = registry.session("s2", "e1");
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(b.exam_id(), "e2");
        assert_eq!(c.student_id(), "s2");
    }

    #[test]
    fn test_reset_only_touches_existing_sessions() {
        let registry = SessionRegistry::default();
        assert!(!registry.reset("s1", "e1"));
        assert!(registry.is_empty());

        let handle = registry.session("s1", "e1");
        assert!(registry.reset("s1", "e1"));
        assert_eq!(handle.generation(), 1);
        assert!(handle.tracking_status(Instant::now()).tracked_person_id.is_none());
    }

    #[test]
    fn test_remove_forgets_session() {
        let registry = SessionRegistry::default();
        let first = registry.session("s1", "e1");
        assert!(registry.remove("s1", "e1").is_some());
        assert!(registry.get("s1", "e1").is_none());

        let second = registry.session("s1", "e1");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
