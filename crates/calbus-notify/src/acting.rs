//! Scoped principal impersonation over a directory session.

use std::ops::{Deref, DerefMut};

use calbus_core::{DirectorySession, Result};

/// Acts as a principal for as long as the guard lives.
///
/// The principal is pushed on construction and popped on drop, so the
/// previous context is restored on every exit path, including `?` returns
/// and errors raised while the guard is held.
pub struct ActingAs<'a> {
    session: &'a mut dyn DirectorySession,
}

impl<'a> ActingAs<'a> {
    pub fn new(session: &'a mut dyn DirectorySession, principal: &str) -> Result<Self> {
        session.push_principal(principal)?;
        Ok(Self { session })
    }
}

impl<'a> Deref for ActingAs<'a> {
    type Target = dyn DirectorySession + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl<'a> DerefMut for ActingAs<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.session
    }
}

impl Drop for ActingAs<'_> {
    fn drop(&mut self) {
        self.session.pop_principal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use calbus_core::{
        CollectionInfo, Error, ResourceChangeNotification, StoredNotification,
    };

    /// Session that only tracks the principal stack.
    #[derive(Default)]
    struct StackSession {
        stack: Vec<String>,
    }

    #[async_trait]
    impl DirectorySession for StackSession {
        fn push_principal(&mut self, principal: &str) -> Result<()> {
            if principal.is_empty() {
                return Err(Error::InvalidInput("empty principal".into()));
            }
            self.stack.push(principal.to_string());
            Ok(())
        }

        fn pop_principal(&mut self) {
            self.stack.pop();
        }

        fn current_principal(&self) -> Option<&str> {
            self.stack.last().map(String::as_str)
        }

        async fn collection(&mut self, _path: &str) -> Result<Option<CollectionInfo>> {
            Ok(None)
        }

        async fn notify_preference(&mut self, _p: &str, _path: &str) -> Result<Option<bool>> {
            Ok(None)
        }

        async fn default_notify_preference(&mut self) -> Result<bool> {
            Ok(true)
        }

        async fn find_notification(&mut self, _key: &str) -> Result<Option<StoredNotification>> {
            Err(Error::StaleState("always".into()))
        }

        async fn add_notification(
            &mut self,
            _n: &ResourceChangeNotification,
        ) -> Result<StoredNotification> {
            Err(Error::Internal("unused".into()))
        }

        async fn update_notification(&mut self, _s: &StoredNotification) -> Result<()> {
            Ok(())
        }

        async fn remove_notification(&mut self, _s: &StoredNotification) -> Result<()> {
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_guard_pushes_and_pops() {
        let mut session = StackSession::default();
        {
            let acting = ActingAs::new(&mut session, "alice").unwrap();
            assert_eq!(acting.current_principal(), Some("alice"));
        }
        assert_eq!(session.current_principal(), None);
    }

    #[test]
    fn test_guards_nest() {
        let mut session = StackSession::default();
        let mut outer = ActingAs::new(&mut session, "mike").unwrap();
        {
            let inner = ActingAs::new(&mut *outer, "alice").unwrap();
            assert_eq!(inner.current_principal(), Some("alice"));
        }
        assert_eq!(outer.current_principal(), Some("mike"));
    }

    #[tokio::test]
    async fn test_context_restored_when_work_fails() {
        async fn lookup(session: &mut dyn DirectorySession) -> Result<()> {
            let mut acting = ActingAs::new(session, "alice")?;
            acting.find_notification("resource-change:/cal/mike/ev1").await?;
            Ok(())
        }

        let mut session = StackSession::default();
        session.push_principal("system").unwrap();
        assert!(lookup(&mut session).await.is_err());
        assert_eq!(session.current_principal(), Some("system"));
    }

    #[test]
    fn test_failed_push_leaves_stack_untouched() {
        let mut session = StackSession::default();
        assert!(ActingAs::new(&mut session, "").is_err());
        assert!(session.stack.is_empty());
    }
}
