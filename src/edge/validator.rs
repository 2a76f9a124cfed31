use crate::edge::error::RedeemError;
use crate::entry::{EntryState, EntryStore, EntryStoreResolver, now_unix};
use crate::issuer::is_well_formed_token;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

#[derive(Debug, Default, Deserialize)]
struct RedeemQuery {
    token: Option<String>,
}

/// Pull the `token` query parameter out of a raw query string
pub fn extract_token(query: Option<&str>) -> Result<String, RedeemError> {
    let query = query.unwrap_or("");
    let parsed: RedeemQuery = serde_qs::from_str(query).map_err(|_| RedeemError::TokenMissing)?;

    match parsed.token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(RedeemError::TokenMissing),
    }
}

/// Admission check run in front of every asset request.
///
/// A request is admitted only when this call is the one that flips the entry
/// from `PENDING` to `CONSUMED`. Anything short of a confirmed flip denies.
#[derive(Clone)]
pub struct EdgeValidator {
    resolver: EntryStoreResolver,
    budget: Duration,
}

impl EdgeValidator {
    pub fn new(resolver: EntryStoreResolver, budget: Duration) -> Self {
        Self { resolver, budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Consume the request's token. Returns the token on success.
    ///
    /// Resolution, consumption and the cause lookup share one deadline of
    /// `budget` from the moment the token is parsed.
    pub async fn admit(&self, query: Option<&str>) -> Result<String, RedeemError> {
        let token = extract_token(query)?;
        if !is_well_formed_token(&token) {
            return Err(RedeemError::TokenNotFound);
        }

        let deadline = Instant::now() + self.budget;

        let store = match timeout_at(deadline, self.resolver.resolve()).await {
            Ok(Ok(store)) => store,
            Ok(Err(error)) => return Err(RedeemError::ConfigUnavailable(error.to_string())),
            Err(_) => {
                return Err(RedeemError::ConfigUnavailable(format!(
                    "not resolved within {}ms",
                    self.budget.as_millis()
                )));
            }
        };

        let now = now_unix();
        match timeout_at(deadline, store.consume_if_pending(&token, now)).await {
            Ok(Ok(true)) => Ok(token),
            Ok(Ok(false)) => Err(denial_cause(store.as_ref(), &token, now, deadline).await),
            Ok(Err(error)) => Err(RedeemError::StoreUnavailable(error.to_string())),
            Err(_) => Err(RedeemError::StoreUnavailable(format!(
                "no answer within {}ms",
                self.budget.as_millis()
            ))),
        }
    }
}

/// Label a refused consume for the logs. Does not influence the decision.
async fn denial_cause(
    store: &dyn EntryStore,
    token: &str,
    now: i64,
    deadline: Instant,
) -> RedeemError {
    match timeout_at(deadline, store.get(token)).await {
        Ok(Ok(Some(entry))) if entry.state == EntryState::Consumed => {
            RedeemError::TokenAlreadyConsumed
        }
        Ok(Ok(Some(entry))) if entry.is_expired(now) => RedeemError::TokenExpired,
        Ok(Ok(Some(_))) => RedeemError::ConsumeRefused,
        Ok(Ok(None)) => RedeemError::TokenNotFound,
        Ok(Err(error)) => RedeemError::StoreUnavailable(error.to_string()),
        // Out of budget: the consume was refused, the cause stays unknown
        Err(_) => RedeemError::ConsumeRefused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{
        Entry, EntryStoreConfig, MemoryEntryStore, StoreError, StoreResult,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Store whose backend never answers
    struct StallingStore;

    #[async_trait]
    impl EntryStore for StallingStore {
        async fn create_if_absent(&self, _entry: &Entry) -> StoreResult<bool> {
            futures::future::pending().await
        }

        async fn get(&self, _token: &str) -> StoreResult<Option<Entry>> {
            futures::future::pending().await
        }

        async fn consume_if_pending(&self, _token: &str, _now: i64) -> StoreResult<bool> {
            futures::future::pending().await
        }

        fn backend(&self) -> &'static str {
            "stalling"
        }
    }

    /// Store whose backend refuses every call
    struct BrokenStore;

    #[async_trait]
    impl EntryStore for BrokenStore {
        async fn create_if_absent(&self, _entry: &Entry) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn get(&self, _token: &str) -> StoreResult<Option<Entry>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn consume_if_pending(&self, _token: &str, _now: i64) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    /// Store that refuses every consume after `delay` and answers lookups just as slowly
    struct RefusingStore {
        delay: Duration,
        entry: Entry,
    }

    #[async_trait]
    impl EntryStore for RefusingStore {
        async fn create_if_absent(&self, _entry: &Entry) -> StoreResult<bool> {
            Ok(false)
        }

        async fn get(&self, _token: &str) -> StoreResult<Option<Entry>> {
            tokio::time::sleep(self.delay).await;
            Ok(Some(self.entry.clone()))
        }

        async fn consume_if_pending(&self, _token: &str, _now: i64) -> StoreResult<bool> {
            tokio::time::sleep(self.delay).await;
            Ok(false)
        }

        fn backend(&self) -> &'static str {
            "refusing"
        }
    }

    async fn validator_with(entries: &[Entry]) -> (Arc<MemoryEntryStore>, EdgeValidator) {
        let store = Arc::new(MemoryEntryStore::new());
        for entry in entries {
            store.create_if_absent(entry).await.unwrap();
        }
        let validator = EdgeValidator::new(
            EntryStoreResolver::ready(store.clone()),
            Duration::from_millis(500),
        );
        (store, validator)
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(Some("token=abc123")).unwrap(), "abc123");
        assert_eq!(
            extract_token(Some("foo=bar&token=abc123")).unwrap(),
            "abc123"
        );

        assert_eq!(extract_token(None), Err(RedeemError::TokenMissing));
        assert_eq!(extract_token(Some("")), Err(RedeemError::TokenMissing));
        assert_eq!(extract_token(Some("token=")), Err(RedeemError::TokenMissing));
        assert_eq!(
            extract_token(Some("other=abc123")),
            Err(RedeemError::TokenMissing)
        );
    }

    #[tokio::test]
    async fn test_first_redemption_wins_second_denied() {
        let (store, validator) = validator_with(&[Entry::pending("abc123", now_unix(), 0)]).await;

        assert_eq!(
            validator.admit(Some("token=abc123")).await.unwrap(),
            "abc123"
        );
        assert_eq!(
            validator.admit(Some("token=abc123")).await,
            Err(RedeemError::TokenAlreadyConsumed)
        );

        let entry = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Consumed);
    }

    #[tokio::test]
    async fn test_unknown_and_missing_tokens_deny() {
        let (_store, validator) = validator_with(&[]).await;

        assert_eq!(
            validator.admit(Some("token=never-issued")).await,
            Err(RedeemError::TokenNotFound)
        );
        assert_eq!(validator.admit(None).await, Err(RedeemError::TokenMissing));
        assert_eq!(
            validator.admit(Some("token=has%20space")).await,
            Err(RedeemError::TokenNotFound)
        );
    }

    #[tokio::test]
    async fn test_expired_pending_entry_denies() {
        let now = now_unix();
        let expired = Entry {
            expires_at: Some(now - 5),
            ..Entry::pending("stale", now - 100, 0)
        };
        let (store, validator) = validator_with(&[expired]).await;

        assert_eq!(
            validator.admit(Some("token=stale")).await,
            Err(RedeemError::TokenExpired)
        );
        let entry = store.get("stale").await.unwrap().unwrap();
        assert_eq!(entry.state, EntryState::Pending);
    }

    #[tokio::test]
    async fn test_store_error_fails_closed() {
        let validator = EdgeValidator::new(
            EntryStoreResolver::ready(Arc::new(BrokenStore)),
            Duration::from_millis(500),
        );

        let result = validator.admit(Some("token=abc123")).await;
        assert!(matches!(result, Err(RedeemError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_store_timeout_fails_closed() {
        let validator = EdgeValidator::new(
            EntryStoreResolver::ready(Arc::new(StallingStore)),
            Duration::from_millis(20),
        );

        let started = std::time::Instant::now();
        let result = validator.admit(Some("token=abc123")).await;
        assert!(matches!(result, Err(RedeemError::StoreUnavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_slow_refusal_stays_within_budget() {
        let budget = Duration::from_millis(300);
        let store = RefusingStore {
            delay: budget * 4 / 5,
            entry: Entry::pending("slow", now_unix(), 0),
        };
        let validator = EdgeValidator::new(EntryStoreResolver::ready(Arc::new(store)), budget);

        let started = std::time::Instant::now();
        let result = validator.admit(Some("token=slow")).await;
        let elapsed = started.elapsed();

        assert_eq!(result, Err(RedeemError::ConsumeRefused));
        assert!(elapsed < budget + Duration::from_millis(150), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_refused_consume_on_pending_entry_is_labelled() {
        let store = RefusingStore {
            delay: Duration::ZERO,
            entry: Entry::pending("pending", now_unix(), 0),
        };
        let validator = EdgeValidator::new(
            EntryStoreResolver::ready(Arc::new(store)),
            Duration::from_millis(500),
        );

        assert_eq!(
            validator.admit(Some("token=pending")).await,
            Err(RedeemError::ConsumeRefused)
        );
    }

    #[tokio::test]
    async fn test_unresolvable_store_denies() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let validator = EdgeValidator::new(
            EntryStoreResolver::new(EntryStoreConfig::Sqlite {
                path: blocker.join("entries.db"),
            }),
            Duration::from_millis(500),
        );

        let result = validator.admit(Some("token=abc123")).await;
        assert!(matches!(result, Err(RedeemError::ConfigUnavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemptions_single_winner() {
        for attempts in [2usize, 8, 64] {
            let (_store, validator) =
                validator_with(&[Entry::pending("race", now_unix(), 0)]).await;

            let tasks = (0..attempts)
                .map(|_| {
                    let validator = validator.clone();
                    tokio::spawn(async move { validator.admit(Some("token=race")).await })
                })
                .collect::<Vec<_>>();

            let results = futures::future::join_all(tasks).await;
            let admitted = results
                .iter()
                .filter(|r| r.as_ref().unwrap().is_ok())
                .count();
            assert_eq!(admitted, 1, "attempts={attempts}");
        }
    }
}
