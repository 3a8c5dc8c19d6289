//! Mutation executor
//!
//! A mutation runs one write against the remote service:
//!
//! 1. in-flight fetches for the touched keys are cancelled,
//! 2. the touched entries are captured in a [`CacheSnapshot`],
//! 3. the optimistic patch is applied through the store,
//! 4. the network call runs,
//! 5. on failure the snapshot is restored verbatim,
//! 6. on settlement the declared invalidation edges fire.
//!
//! Steps 4 to 6 run on a spawned task, so an instance whose caller goes away
//! still restores or commits its patch.
//!
//! The result is a [`MutationOutcome`]: either committed with the server
//! response, or rolled back with the error and the restored keys.

use crate::cache::{lock::mutex_lock, CacheSnapshot, InvalidationEdge, QueryKey};
use crate::client::QueryClient;
use crate::error::{QueryError, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SOURCE: &str = "mutation";

type MutateFn<V, R> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<R>> + Send + Sync>;
type KeysFn<V> = Arc<dyn Fn(&V) -> Vec<QueryKey> + Send + Sync>;
type PatchFn<V> = Arc<dyn Fn(&QueryClient, &V) -> Result<()> + Send + Sync>;
type SuccessFn<V, R> = Arc<dyn Fn(&QueryClient, &R, &V) + Send + Sync>;
type ErrorFn<V> = Arc<dyn Fn(&QueryClient, &QueryError, &MutationContext<V>) + Send + Sync>;
type SettledFn<V, R> = Arc<dyn Fn(&QueryClient, &MutationOutcome<R>, &V) + Send + Sync>;

/// Lifecycle of a mutation instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationState::Idle => write!(f, "idle"),
            MutationState::Pending => write!(f, "pending"),
            MutationState::Committed => write!(f, "committed"),
            MutationState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Per-instance data of a running mutation
#[derive(Debug, Clone)]
pub struct MutationContext<V> {
    pub variables: V,

    /// Entries captured before the optimistic patch
    pub previous_snapshot: Option<CacheSnapshot>,

    pub state: MutationState,
}

/// Settled result of a mutation
#[derive(Debug, Clone)]
pub enum MutationOutcome<R> {
    /// The server accepted the write
    Committed(R),

    /// The write failed and the optimistic patch was undone
    RolledBack {
        error: QueryError,
        snapshot_keys: Vec<QueryKey>,
    },
}

impl<R> MutationOutcome<R> {
    pub fn state(&self) -> MutationState {
        match self {
            MutationOutcome::Committed(_) => MutationState::Committed,
            MutationOutcome::RolledBack { .. } => MutationState::RolledBack,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, MutationOutcome::RolledBack { .. })
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            MutationOutcome::Committed(_) => None,
            MutationOutcome::RolledBack { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<R> {
        match self {
            MutationOutcome::Committed(value) => Ok(value),
            MutationOutcome::RolledBack { error, .. } => Err(error),
        }
    }
}

struct Optimistic<V> {
    keys: KeysFn<V>,
    patch: PatchFn<V>,
}

impl<V> Clone for Optimistic<V> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            patch: self.patch.clone(),
        }
    }
}

/// A write operation with its optimistic patch and invalidation edges
pub struct Mutation<V, R> {
    mutate: MutateFn<V, R>,
    optimistic: Option<Optimistic<V>>,
    edge: InvalidationEdge,
    on_success: Option<SuccessFn<V, R>>,
    on_error: Option<ErrorFn<V>>,
    on_settled: Option<SettledFn<V, R>>,
}

impl<V, R> Clone for Mutation<V, R> {
    fn clone(&self) -> Self {
        Self {
            mutate: self.mutate.clone(),
            optimistic: self.optimistic.clone(),
            edge: self.edge.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<V, R> fmt::Debug for Mutation<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.edge.mutation)
            .field("optimistic", &self.optimistic.is_some())
            .field("invalidates", &self.edge.prefixes)
            .finish()
    }
}

impl<V, R> Mutation<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Create a mutation named `name` performing `mutate`
    pub fn new<F, Fut>(name: impl Into<String>, mutate: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self {
            mutate: Arc::new(move |variables| mutate(variables).boxed()),
            optimistic: None,
            edge: InvalidationEdge::new(name),
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.edge.mutation
    }

    /// Declare the keys the patch touches and the patch itself.
    ///
    /// The patch runs before the network call and should write through
    /// [`QueryClient::set_query_data`]. It is undone if the call fails.
    pub fn optimistic<K, P>(mut self, keys: K, patch: P) -> Self
    where
        K: Fn(&V) -> Vec<QueryKey> + Send + Sync + 'static,
        P: Fn(&QueryClient, &V) -> Result<()> + Send + Sync + 'static,
    {
        self.optimistic = Some(Optimistic {
            keys: Arc::new(keys),
            patch: Arc::new(patch),
        });
        self
    }

    /// Mark `prefix` stale whenever the mutation settles
    pub fn invalidates(mut self, prefix: impl Into<QueryKey>) -> Self {
        self.edge = self.edge.prefix(prefix);
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&QueryClient, &R, &V) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Runs after the rollback
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&QueryClient, &QueryError, &MutationContext<V>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Runs last, after invalidation
    pub fn on_settled<F>(mut self, callback: F) -> Self
    where
        F: Fn(&QueryClient, &MutationOutcome<R>, &V) + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(callback));
        self
    }

    /// The static invalidation edge of this mutation
    pub fn edge(&self) -> &InvalidationEdge {
        &self.edge
    }

    /// Run one instance of the mutation
    pub async fn execute(&self, client: &QueryClient, variables: V) -> MutationOutcome<R> {
        let handle = self.start(client, variables, |_| {});
        join_outcome(self.name(), handle).await
    }

    /// Apply the optimistic patch now and settle the rest on its own task.
    ///
    /// Once the patch is in the cache the instance always settles: the
    /// snapshot is restored on failure and the edges fire, even if the
    /// caller stops waiting. `on_done` runs last with the final state.
    fn start<D>(&self, client: &QueryClient, variables: V, on_done: D) -> JoinHandle<MutationOutcome<R>>
    where
        D: FnOnce(MutationState) + Send + 'static,
    {
        let mut context = MutationContext {
            variables: variables.clone(),
            previous_snapshot: None,
            state: MutationState::Pending,
        };
        info!("Mutation {} started", self.name());

        let mut patch_error = None;
        if let Some(optimistic) = &self.optimistic {
            let keys = (optimistic.keys)(&variables);
            for key in &keys {
                client.cancel_queries(key.clone());
            }
            context.previous_snapshot = Some(client.cache().snapshot(&keys));

            match (optimistic.patch)(client, &variables) {
                Ok(()) => debug!("Optimistic patch applied to {} keys", keys.len()),
                Err(e) => {
                    warn!("Optimistic patch for {} failed: {}", self.name(), e);
                    patch_error = Some(e);
                }
            }
        }

        let mutation = self.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let result = match patch_error {
                Some(e) => Err(e),
                None => (mutation.mutate)(variables).await,
            };
            let outcome = mutation.settle(&client, context, result);
            on_done(outcome.state());
            outcome
        })
    }

    fn settle(&self, client: &QueryClient, mut context: MutationContext<V>, result: Result<R>) -> MutationOutcome<R> {
        let outcome = match result {
            Ok(value) => {
                context.state = MutationState::Committed;
                info!("Mutation {} committed", self.name());
                if let Some(callback) = &self.on_success {
                    callback(client, &value, &context.variables);
                }
                MutationOutcome::Committed(value)
            }
            Err(error) => {
                let snapshot_keys = match &context.previous_snapshot {
                    Some(snapshot) => {
                        let restored = client.cache().restore(snapshot);
                        client.cache().record(|stats| stats.rollbacks += 1);
                        restored
                    }
                    None => Vec::new(),
                };
                context.state = MutationState::RolledBack;
                warn!(
                    "Mutation {} failed, rolled back {} keys: {}",
                    self.name(),
                    snapshot_keys.len(),
                    error
                );
                if let Some(callback) = &self.on_error {
                    callback(client, &error, &context);
                }
                MutationOutcome::RolledBack {
                    error,
                    snapshot_keys,
                }
            }
        };

        for prefix in &self.edge.prefixes {
            client.invalidate_with_reason(prefix, self.edge.reason());
        }

        if let Some(callback) = &self.on_settled {
            callback(client, &outcome, &context.variables);
        }
        outcome
    }
}

async fn join_outcome<R>(name: &str, handle: JoinHandle<MutationOutcome<R>>) -> MutationOutcome<R> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Mutation {} task failed: {}", name, e);
            MutationOutcome::RolledBack {
                error: QueryError::Other(format!("mutation task failed: {}", e)),
                snapshot_keys: Vec::new(),
            }
        }
    }
}

/// Consumer handle for a mutation: `mutate_async` plus pending state
pub struct MutationObserver<V, R> {
    client: QueryClient,
    mutation: Arc<Mutation<V, R>>,
    pending: Arc<AtomicUsize>,
    state: Arc<Mutex<MutationState>>,
}

impl<V, R> Clone for MutationObserver<V, R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            mutation: self.mutation.clone(),
            pending: self.pending.clone(),
            state: self.state.clone(),
        }
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<V, R> MutationObserver<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub(crate) fn new(client: QueryClient, mutation: Mutation<V, R>) -> Self {
        Self {
            client,
            mutation: Arc::new(mutation),
            pending: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(Mutex::new(MutationState::Idle)),
        }
    }

    /// Run the mutation and return its outcome.
    ///
    /// Dropping the returned future does not abandon the instance: it still
    /// settles, and `state()` reports the result.
    pub async fn mutate(&self, variables: V) -> MutationOutcome<R> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(self.pending.clone());
        *mutex_lock(&self.state, SOURCE, "mutate") = MutationState::Pending;

        let state = self.state.clone();
        let handle = self.mutation.start(&self.client, variables, move |settled| {
            *mutex_lock(&state, SOURCE, "settle") = settled;
            drop(guard);
        });
        join_outcome(self.mutation.name(), handle).await
    }

    /// Run the mutation, returning the server response or the error
    pub async fn mutate_async(&self, variables: V) -> Result<R> {
        self.mutate(variables).await.into_result()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// State of the most recently settled (or running) instance
    pub fn state(&self) -> MutationState {
        *mutex_lock(&self.state, SOURCE, "state")
    }

    pub fn mutation(&self) -> &Mutation<V, R> {
        &self.mutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SyncConfig;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: i64,
        done: bool,
    }

    fn list_key() -> QueryKey {
        QueryKey::from(["items"])
    }

    fn toggle(fail: bool) -> Mutation<i64, i64> {
        Mutation::new("toggle_item", move |id: i64| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if fail {
                Err(QueryError::http(500, "boom"))
            } else {
                Ok(id)
            }
        })
        .optimistic(
            |_| vec![list_key()],
            |client, id| {
                client.set_query_data::<Vec<Item>, _>(&list_key(), |items| {
                    items.map(|items| {
                        items
                            .iter()
                            .map(|item| Item {
                                done: if item.id == *id { !item.done } else { item.done },
                                ..item.clone()
                            })
                            .collect()
                    })
                })?;
                Ok(())
            },
        )
    }

    fn seeded_client() -> QueryClient {
        let client = QueryClient::new(SyncConfig::testing());
        client
            .set_query_data::<Vec<Item>, _>(&list_key(), |_| {
                Some(vec![Item { id: 1, done: false }, Item { id: 2, done: false }])
            })
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_committed_mutation_keeps_patch() {
        let client = seeded_client();
        let observer = client.use_mutation(toggle(false));

        let outcome = observer.mutate(1).await;
        assert!(outcome.is_committed());
        assert_eq!(observer.state(), MutationState::Committed);

        let items = client.get_query_data::<Vec<Item>>(&list_key()).unwrap().unwrap();
        assert!(items[0].done);
        assert!(!items[1].done);
    }

    #[tokio::test]
    async fn test_failed_mutation_restores_snapshot_exactly() {
        let client = seeded_client();
        let before = client.cache().get(&list_key()).unwrap();
        let observer = client.use_mutation(toggle(true));

        let outcome = observer.mutate(1).await;
        let after = client.cache().get(&list_key()).unwrap();

        assert!(outcome.is_rolled_back());
        assert!(matches!(outcome.error(), Some(e) if e.is_status(500)));
        assert!(after.same_state(&before));
        assert!(after.version > before.version);
        assert_eq!(client.stats().rollbacks, 1);
        assert_eq!(observer.state(), MutationState::RolledBack);
    }

    #[tokio::test]
    async fn test_patch_is_visible_while_pending() {
        let client = seeded_client();
        let observer = client.use_mutation(toggle(true));

        let running = {
            let observer = observer.clone();
            tokio::spawn(async move { observer.mutate_async(2).await })
        };
        tokio::time::sleep(Duration::from_millis(2)).await;

        assert!(observer.is_pending());
        let items = client.get_query_data::<Vec<Item>>(&list_key()).unwrap().unwrap();
        assert!(items[1].done);

        assert!(running.await.unwrap().is_err());
        assert!(!observer.is_pending());
        let items = client.get_query_data::<Vec<Item>>(&list_key()).unwrap().unwrap();
        assert!(!items[1].done);
    }

    #[tokio::test]
    async fn test_edges_fire_on_success_and_failure() {
        for fail in [false, true] {
            let client = seeded_client();
            client
                .set_query_data::<u32, _>(&QueryKey::from(["stats", "me"]), |_| Some(1))
                .unwrap();

            let mutation = toggle(fail).invalidates(["stats", "me"]);
            let outcome = mutation.execute(&client, 1).await;
            assert_eq!(outcome.is_committed(), !fail);

            let stats = client.cache().get(&QueryKey::from(["stats", "me"])).unwrap();
            assert!(stats.invalidated);
            assert!(stats.is_stale());
        }
    }

    #[tokio::test]
    async fn test_callbacks_run_in_order() {
        let client = seeded_client();
        let log = Arc::new(Mutex::new(Vec::new()));

        let on_error_log = log.clone();
        let on_settled_log = log.clone();
        let mutation = toggle(true)
            .on_success(|_, _, _| panic!("must not commit"))
            .on_error(move |client, _, context| {
                let items = client.get_query_data::<Vec<Item>>(&list_key()).unwrap().unwrap();
                assert!(!items[0].done);
                assert!(context.previous_snapshot.is_some());
                on_error_log.lock().unwrap().push("error");
            })
            .on_settled(move |_, outcome, _| {
                assert!(outcome.is_rolled_back());
                on_settled_log.lock().unwrap().push("settled");
            });

        mutation.execute(&client, 1).await;
        assert_eq!(*log.lock().unwrap(), vec!["error", "settled"]);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_rolls_back() {
        let client = seeded_client();
        let before = client.cache().get(&list_key()).unwrap();
        let observer = client.use_mutation(toggle(true).invalidates(["items"]));

        let timed_out = tokio::time::timeout(Duration::from_millis(2), observer.mutate(1)).await;
        assert!(timed_out.is_err());
        let items = client.get_query_data::<Vec<Item>>(&list_key()).unwrap().unwrap();
        assert!(items[0].done);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = client.cache().get(&list_key()).unwrap();
        assert_eq!(after.data::<Vec<Item>>().unwrap().unwrap()[0], Item { id: 1, done: false });
        assert!(Arc::ptr_eq(before.raw_data().unwrap(), after.raw_data().unwrap()));
        assert!(after.invalidated);
        assert!(!observer.is_pending());
        assert_eq!(observer.state(), MutationState::RolledBack);
        assert_eq!(client.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_mutation_without_patch() {
        let client = QueryClient::new(SyncConfig::testing());
        let mutation = Mutation::new("ping", |n: u32| async move { Ok(n + 1) });
        let observer = client.use_mutation(mutation);

        assert_eq!(observer.state(), MutationState::Idle);
        assert_eq!(observer.mutate_async(1).await.unwrap(), 2);
        assert_eq!(client.stats().rollbacks, 0);
    }
}
