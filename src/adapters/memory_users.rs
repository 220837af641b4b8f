use async_trait::async_trait;
use scc::HashMap;

use crate::ports::identity::{IdentityError, User, UserContextAdapter};

/// In-memory user store used by default authentication.
///
/// Records are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryUserAdapter {
    users: HashMap<String, User>,
}

impl MemoryUserAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserContextAdapter for MemoryUserAdapter {
    async fn get_user(&self, id: &str) -> Result<Option<User>, IdentityError> {
        Ok(self.users.read_async(id, |_, user| user.clone()).await)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        let mut found = None;
        self.users
            .iter_async(|_, user| {
                if user.email.eq_ignore_ascii_case(email) {
                    found = Some(user.clone());
                    return false;
                }
                true
            })
            .await;
        Ok(found)
    }

    async fn upsert_user(&self, user: User) -> Result<(), IdentityError> {
        if user.id.is_empty() {
            return Err(IdentityError::Backend("User id must not be empty".to_string()));
        }
        self.users.upsert_async(user.id.clone(), user).await;
        Ok(())
    }

    async fn remove_user(&self, id: &str) -> Result<bool, IdentityError> {
        Ok(self.users.remove_async(id).await.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            username: id.to_string(),
            email: email.to_string(),
            ..User::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let store = MemoryUserAdapter::new();
        store.upsert_user(user("1", "a@example.com")).await.unwrap();
        store.upsert_user(user("2", "b@example.com")).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_user("1").await.unwrap().unwrap().email, "a@example.com");
        assert_eq!(
            store
                .get_user_by_email("B@example.com")
                .await
                .unwrap()
                .unwrap()
                .id,
            "2"
        );
        assert!(store.get_user("3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemoryUserAdapter::new();
        store.upsert_user(user("1", "old@example.com")).await.unwrap();
        store.upsert_user(user("1", "new@example.com")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get_user("1").await.unwrap().unwrap().email,
            "new@example.com"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_of_same_user() {
        let store = Arc::new(MemoryUserAdapter::new());
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .upsert_user(user("1", &format!("{i}@example.com")))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 1);
        assert!(store.get_user("1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryUserAdapter::new();
        store.upsert_user(user("1", "a@example.com")).await.unwrap();

        assert!(store.remove_user("1").await.unwrap());
        assert!(!store.remove_user("1").await.unwrap());
        assert!(store.is_empty());
        assert!(store.upsert_user(user("", "x@example.com")).await.is_err());
    }
}
