//! In-process adapters for the directory, notifier and attachment ports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::actor::{Role, UserId};
use crate::domain::notification::{Notification, OutgoingNotification};
use crate::errors::ApplicationError;
use crate::ports::{AttachmentStore, Directory, Notifier};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fixed reporting lines and role assignments.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    managers: BTreeMap<UserId, UserId>,
    roles: BTreeMap<Role, BTreeSet<UserId>>,
}

impl StaticDirectory {
    pub fn with_manager(mut self, user: &str, manager: &str) -> Self {
        self.managers.insert(UserId(user.to_string()), UserId(manager.to_string()));
        self
    }

    pub fn with_role(mut self, user: &str, role: Role) -> Self {
        self.roles.entry(role).or_default().insert(UserId(user.to_string()));
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn direct_manager_of(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserId>, ApplicationError> {
        Ok(self.managers.get(user_id).cloned())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self.roles.get(&role).map(|users| users.iter().cloned().collect()).unwrap_or_default())
    }
}

/// Keeps delivered notifications in memory. Can be switched into a failing
/// mode to exercise best-effort delivery.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn delivered(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }

    pub fn fail_deliveries(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), ApplicationError> {
        if *lock(&self.failing) {
            return Err(ApplicationError::Integration("notification channel is down".to_string()));
        }
        let mut delivered = lock(&self.delivered);
        let id = delivered.len() as i64 + 1;
        delivered.push(Notification {
            id,
            user_id: notification.user_id.clone(),
            message: notification.message.clone(),
            link: notification.link.clone(),
            is_read: false,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn inbox(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, ApplicationError> {
        let mut inbox: Vec<Notification> = lock(&self.delivered)
            .iter()
            .filter(|notification| &notification.user_id == user_id)
            .filter(|notification| !unread_only || !notification.is_read)
            .cloned()
            .collect();
        inbox.reverse();
        Ok(inbox)
    }

    async fn mark_read(
        &self,
        user_id: &UserId,
        notification_id: i64,
    ) -> Result<bool, ApplicationError> {
        let mut delivered = lock(&self.delivered);
        let found = delivered.iter_mut().find(|notification| {
            notification.id == notification_id && &notification.user_id == user_id
        });
        Ok(match found {
            Some(notification) => {
                notification.is_read = true;
                true
            }
            None => false,
        })
    }

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        let mut delivered = lock(&self.delivered);
        let mut updated = 0;
        for notification in delivered.iter_mut() {
            if &notification.user_id == user_id && !notification.is_read {
                notification.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn unread_count(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        Ok(lock(&self.delivered)
            .iter()
            .filter(|notification| &notification.user_id == user_id && !notification.is_read)
            .count() as u64)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryAttachmentStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryAttachmentStore {
    pub fn paths(&self) -> Vec<String> {
        lock(&self.blobs).keys().cloned().collect()
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, ApplicationError> {
        let path = format!("memory/{}-{}", uuid::Uuid::new_v4(), file_name);
        lock(&self.blobs).insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, ApplicationError> {
        lock(&self.blobs)
            .get(path)
            .cloned()
            .ok_or_else(|| ApplicationError::NotFound(format!("attachment {path}")))
    }

    async fn delete(&self, path: &str) -> Result<(), ApplicationError> {
        lock(&self.blobs).remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryAttachmentStore, RecordingNotifier, StaticDirectory};
    use crate::domain::actor::{Role, UserId};
    use crate::domain::notification::OutgoingNotification;
    use crate::ports::{AttachmentStore, Directory, Notifier};

    #[tokio::test]
    async fn static_directory_resolves_managers_and_roles() {
        let directory = StaticDirectory::default()
            .with_manager("u-req", "u-dm")
            .with_role("u-acct-1", Role::Accountant)
            .with_role("u-acct-2", Role::Accountant);

        let manager = directory
            .direct_manager_of(&UserId("u-req".to_string()))
            .await
            .expect("lookup");
        assert_eq!(manager, Some(UserId("u-dm".to_string())));
        let accountants = directory.users_with_role(Role::Accountant).await.expect("lookup");
        assert_eq!(accountants.len(), 2);
        assert!(directory.users_with_role(Role::FinalManager).await.expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn recording_notifier_tracks_read_state() {
        let notifier = RecordingNotifier::default();
        let user = UserId("u-req".to_string());
        for message in ["first", "second"] {
            notifier
                .notify(&OutgoingNotification {
                    user_id: user.clone(),
                    message: message.to_string(),
                    link: "/requests/REQ-1".to_string(),
                })
                .await
                .expect("notify");
        }

        assert_eq!(notifier.unread_count(&user).await.expect("count"), 2);
        let inbox = notifier.inbox(&user, false).await.expect("inbox");
        assert_eq!(inbox[0].message, "second");
        assert!(notifier.mark_read(&user, inbox[0].id).await.expect("mark"));
        assert_eq!(notifier.inbox(&user, true).await.expect("inbox").len(), 1);
        assert_eq!(notifier.mark_all_read(&user).await.expect("mark all"), 1);
        assert_eq!(notifier.unread_count(&user).await.expect("count"), 0);

        notifier.fail_deliveries(true);
        assert!(notifier
            .notify(&OutgoingNotification {
                user_id: user,
                message: "third".to_string(),
                link: String::new(),
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn attachment_store_round_trips_and_deletes() {
        let store = InMemoryAttachmentStore::default();
        let path = store.store("quote.pdf", b"%PDF").await.expect("store");
        assert_eq!(store.fetch(&path).await.expect("fetch"), b"%PDF".to_vec());
        store.delete(&path).await.expect("delete");
        assert!(store.fetch(&path).await.is_err());
        assert!(store.paths().is_empty());
    }
}
