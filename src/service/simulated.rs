//! In-memory collaborators with simulated latency and scripted failures.
//!
//! Behaviour is deterministic apart from optional latency jitter:
//! - users canonicalise by trimming and lower-casing the address
//! - messages come from `with_messages()` or are derived from the user id
//! - spam flags come from `with_spam()` or default to `id % 3 == 0`

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::config::SimulatedConfig;
use crate::error::ServiceError;
use crate::pipeline::types::{MessageId, User};
use crate::service::{MessageStore, SpamChecker, UserDirectory};

/// Upper bound on derived message ids per user.
const MAX_DERIVED_MESSAGES: usize = 100;

/// User ids are kept below this so derived message ids stay readable.
const USER_ID_SPACE: u64 = 1_000_000;

/// Ids handed out so far, keyed by canonical email.
#[derive(Default)]
struct UserIds {
    by_email: HashMap<String, u64>,
    taken: HashSet<u64>,
}

impl UserIds {
    /// The email's id, assigned on first sight.
    ///
    /// Starts from the address hash and steps forward past ids already held
    /// by another email, so no two users share an id or derived messages.
    fn resolve(&mut self, canonical: &str) -> u64 {
        if let Some(&id) = self.by_email.get(canonical) {
            return id;
        }
        let mut id = user_id(canonical);
        while self.taken.contains(&id) {
            id = (id + 1) % USER_ID_SPACE;
        }
        self.taken.insert(id);
        self.by_email.insert(canonical.to_string(), id);
        id
    }
}

/// Simulated lookup, fetch and spam services in one struct.
pub struct SimulatedService {
    config: SimulatedConfig,
    messages: HashMap<String, Vec<MessageId>>,
    spam: HashMap<MessageId, bool>,
    failing_users: HashSet<String>,
    failing_checks: HashSet<MessageId>,
    user_ids: Mutex<UserIds>,
    lookup_calls: AtomicUsize,
    fetch_batches: Mutex<Vec<Vec<User>>>,
    check_calls: AtomicUsize,
    checks_in_flight: AtomicUsize,
    max_checks_in_flight: AtomicUsize,
}

impl SimulatedService {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            messages: HashMap::new(),
            spam: HashMap::new(),
            failing_users: HashSet::new(),
            failing_checks: HashSet::new(),
            user_ids: Mutex::new(UserIds::default()),
            lookup_calls: AtomicUsize::new(0),
            fetch_batches: Mutex::new(Vec::new()),
            check_calls: AtomicUsize::new(0),
            checks_in_flight: AtomicUsize::new(0),
            max_checks_in_flight: AtomicUsize::new(0),
        }
    }

    /// Register the messages owned by `email`.
    pub fn with_messages(mut self, email: &str, ids: impl IntoIterator<Item = u64>) -> Self {
        self.messages.insert(
            canonical_email(email),
            ids.into_iter().map(MessageId).collect(),
        );
        self
    }

    /// Register the spam flag of one message.
    pub fn with_spam(mut self, id: u64, has_spam: bool) -> Self {
        self.spam.insert(MessageId(id), has_spam);
        self
    }

    /// Fail every batch that contains `email`.
    pub fn fail_batch_for(mut self, email: &str) -> Self {
        self.failing_users.insert(canonical_email(email));
        self
    }

    /// Fail classification of `id`.
    pub fn fail_check_for(mut self, id: u64) -> Self {
        self.failing_checks.insert(MessageId(id));
        self
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Batches passed to `get_messages`, in call order.
    pub fn fetch_batches(&self) -> Vec<Vec<User>> {
        self.fetch_batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `has_spam` calls observed in flight at once.
    pub fn max_checks_in_flight(&self) -> usize {
        self.max_checks_in_flight.load(Ordering::SeqCst)
    }

    fn derived_messages(&self, user: &User) -> Vec<MessageId> {
        let count = self.config.messages_per_user.min(MAX_DERIVED_MESSAGES) as u64;
        (0..count)
            .map(|i| MessageId(user.id * MAX_DERIVED_MESSAGES as u64 + i))
            .collect()
    }

    async fn delay(&self, base: Duration) {
        let total = base + jitter(self.config.jitter);
        if !total.is_zero() {
            tokio::time::sleep(total).await;
        }
    }
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

#[async_trait]
impl UserDirectory for SimulatedService {
    async fn get_user(&self, email: &str) -> User {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.delay(self.config.lookup_latency).await;

        let email = canonical_email(email);
        let id = match self.user_ids.lock() {
            Ok(mut ids) => ids.resolve(&email),
            Err(poisoned) => poisoned.into_inner().resolve(&email),
        };
        User { id, email }
    }
}

#[async_trait]
impl MessageStore for SimulatedService {
    async fn get_messages(&self, users: &[User]) -> Result<Vec<MessageId>, ServiceError> {
        if let Ok(mut batches) = self.fetch_batches.lock() {
            batches.push(users.to_vec());
        }
        self.delay(self.config.fetch_latency).await;

        if let Some(user) = users
            .iter()
            .find(|u| self.failing_users.contains(&u.email))
        {
            return Err(ServiceError::Unavailable {
                service: "messages".to_string(),
                reason: format!("fetch failed for batch containing {}", user.email),
            });
        }

        let mut ids = Vec::new();
        for user in users {
            match self.messages.get(&user.email) {
                Some(registered) => ids.extend_from_slice(registered),
                None => ids.extend(self.derived_messages(user)),
            }
        }
        debug!(users = users.len(), messages = ids.len(), "Fetched message batch");
        Ok(ids)
    }
}

#[async_trait]
impl SpamChecker for SimulatedService {
    async fn has_spam(&self, id: MessageId) -> Result<bool, ServiceError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.checks_in_flight, &self.max_checks_in_flight);

        let in_flight = self.checks_in_flight.load(Ordering::SeqCst);
        if in_flight > self.config.max_concurrent_checks {
            return Err(ServiceError::RateLimited {
                service: "spam".to_string(),
                in_flight,
                limit: self.config.max_concurrent_checks,
            });
        }

        self.delay(self.config.check_latency).await;

        if self.failing_checks.contains(&id) {
            return Err(ServiceError::Unavailable {
                service: "spam".to_string(),
                reason: format!("classification failed for message {id}"),
            });
        }

        Ok(self.spam.get(&id).copied().unwrap_or(id.0 % 3 == 0))
    }
}

/// Tracks a call's presence in `current`, updating `peak`.
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Canonical form of an address: trimmed, lower-case.
pub fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Stable FNV-1a hash of the canonical address, folded into `USER_ID_SPACE`.
fn user_id(canonical: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in canonical.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash % USER_ID_SPACE
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SimulatedService {
        SimulatedService::new(SimulatedConfig::instant())
    }

    #[tokio::test]
    async fn aliases_resolve_to_same_user() {
        let svc = service();
        let a = svc.get_user("Alice@Example.com").await;
        let b = svc.get_user("  alice@example.com ").await;
        assert_eq!(a, b);
        assert_eq!(a.email, "alice@example.com");
        assert_eq!(svc.lookup_calls(), 2);
    }

    #[tokio::test]
    async fn registered_messages_returned_in_batch() {
        let svc = service()
            .with_messages("a@x", [1, 2])
            .with_messages("b@x", [3]);
        let users = vec![svc.get_user("a@x").await, svc.get_user("b@x").await];

        let ids = svc.get_messages(&users).await.unwrap();
        assert_eq!(ids, vec![MessageId(1), MessageId(2), MessageId(3)]);
        assert_eq!(svc.fetch_batches().len(), 1);
        assert_eq!(svc.fetch_batches()[0].len(), 2);
    }

    #[tokio::test]
    async fn derived_messages_are_per_user() {
        let svc = service();
        let user = svc.get_user("c@x").await;
        let ids = svc.get_messages(std::slice::from_ref(&user)).await.unwrap();
        assert_eq!(ids.len(), SimulatedConfig::default().messages_per_user);
        assert!(ids.iter().all(|id| id.0 / 100 == user.id));
    }

    #[tokio::test]
    async fn failing_user_fails_whole_batch() {
        let svc = service()
            .with_messages("a@x", [1])
            .with_messages("b@x", [2])
            .fail_batch_for("B@x");
        let users = vec![svc.get_user("a@x").await, svc.get_user("b@x").await];

        let err = svc.get_messages(&users).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn spam_flags_registered_or_derived() {
        let svc = service().with_spam(1, true).with_spam(3, false);
        assert!(svc.has_spam(MessageId(1)).await.unwrap());
        assert!(!svc.has_spam(MessageId(3)).await.unwrap());
        assert!(svc.has_spam(MessageId(6)).await.unwrap());
        assert!(!svc.has_spam(MessageId(7)).await.unwrap());
        assert_eq!(svc.check_calls(), 4);
        assert_eq!(svc.max_checks_in_flight(), 1);
    }

    #[tokio::test]
    async fn scripted_check_failure() {
        let svc = service().fail_check_for(4);
        assert!(svc.has_spam(MessageId(4)).await.is_err());
        assert!(svc.has_spam(MessageId(5)).await.is_ok());
    }

    #[tokio::test]
    async fn too_many_concurrent_checks_rate_limited() {
        let svc = std::sync::Arc::new(SimulatedService::new(SimulatedConfig {
            check_latency: Duration::from_millis(50),
            jitter: Duration::ZERO,
            max_concurrent_checks: 2,
            ..SimulatedConfig::instant()
        }));

        let mut handles = Vec::new();
        for id in 0..4 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move { svc.has_spam(MessageId(id)).await }));
        }
        let mut limited = 0;
        for handle in handles {
            if let Err(ServiceError::RateLimited { limit, .. }) = handle.await.unwrap() {
                assert_eq!(limit, 2);
                limited += 1;
            }
        }
        assert!(limited >= 1);
        assert!(svc.max_checks_in_flight() > 2);
    }

    #[test]
    fn user_id_is_stable() {
        assert_eq!(user_id("a@x"), user_id("a@x"));
        assert_ne!(user_id("a@x"), user_id("b@x"));
        assert!(user_id("a@x") < USER_ID_SPACE);
    }

    #[test]
    fn colliding_hashes_get_distinct_ids() {
        let mut ids = UserIds::default();
        let a = ids.resolve("a@x");
        // Occupy the slot "b@x" hashes to with a different address.
        ids.taken.insert(user_id("b@x"));
        let b = ids.resolve("b@x");
        assert_ne!(b, user_id("b@x"));
        assert_ne!(a, b);
        assert_eq!(ids.resolve("b@x"), b);
        assert_eq!(ids.resolve("a@x"), a);
    }

    #[tokio::test]
    async fn many_users_never_share_messages() {
        let svc = service();
        let mut users = Vec::new();
        for n in 0..5_000 {
            users.push(svc.get_user(&format!("user{n}@example.com")).await);
        }
        let ids: HashSet<u64> = users.iter().map(|u| u.id).collect();
        assert_eq!(ids.len(), users.len());

        let messages = svc.get_messages(&users).await.unwrap();
        let unique: HashSet<MessageId> = messages.iter().copied().collect();
        assert_eq!(unique.len(), messages.len());
    }
}
