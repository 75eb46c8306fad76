use crate::{
    metrics::ControllerMetrics,
    queue::WorkQueue,
    resource::{PolicyResource, ResourceId},
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::{Stream, StreamExt};
use kube::{runtime::watcher, ResourceExt};
use std::sync::Arc;
use tokio::sync::watch;

/// Translates policy watch events into work-queue keys.
///
/// Adds and deletes always enqueue. Updates enqueue only when the resource
/// version moved and the spec changed; status-only writes (our own) must not
/// re-trigger reconciliation. The `ready` flag flips once the initial list has
/// been fully delivered, gating worker startup on a warm cache.
///
/// A watch desync replays `Init` and a fresh list; a policy deleted during the
/// disconnect is simply absent from it. Cached keys that are not re-applied by
/// the time `InitDone` arrives are therefore evicted and enqueued so their
/// profiles are torn down.
pub async fn run<P, E>(
    events: E,
    queue: Arc<WorkQueue<ResourceId>>,
    ready: watch::Sender<bool>,
    metrics: ControllerMetrics,
) where
    P: PolicyResource,
    E: Stream<Item = watcher::Event<P>>,
{
    let mut cache: HashMap<ResourceId, P> = HashMap::new();
    let mut relisted: Option<HashSet<ResourceId>> = None;
    tokio::pin!(events);

    while let Some(event) = events.next().await {
        match event {
            watcher::Event::Init => {
                relisted = Some(HashSet::new());
            }
            watcher::Event::InitDone => {
                if let Some(seen) = relisted.take() {
                    let gone = cache
                        .keys()
                        .filter(|id| !seen.contains(*id))
                        .cloned()
                        .collect::<Vec<_>>();
                    for id in gone {
                        cache.remove(&id);
                        tracing::trace!(%id, "enqueue (absent from relist)");
                        metrics.enqueues.inc();
                        queue.add(id);
                    }
                    metrics.queue_depth.set(queue.len() as i64);
                }
                if !*ready.borrow() {
                    tracing::debug!("initial policy list complete");
                }
                let _ = ready.send(true);
            }
            watcher::Event::InitApply(policy) | watcher::Event::Apply(policy) => {
                let id = policy.id();
                if let Some(seen) = relisted.as_mut() {
                    seen.insert(id.clone());
                }
                let enqueue = match cache.get(&id) {
                    None => true,
                    Some(last) => {
                        last.resource_version() != policy.resource_version()
                            && last.spec_changed(&policy)
                    }
                };
                cache.insert(id.clone(), policy);
                if enqueue {
                    tracing::trace!(%id, "enqueue");
                    metrics.enqueues.inc();
                    queue.add(id);
                    metrics.queue_depth.set(queue.len() as i64);
                } else {
                    tracing::trace!(%id, "nothing to reconcile");
                }
            }
            watcher::Event::Delete(policy) => {
                let id = policy.id();
                cache.remove(&id);
                tracing::trace!(%id, "enqueue (deleted)");
                metrics.enqueues.inc();
                queue.add(id);
                metrics.queue_depth.set(queue.len() as i64);
            }
        }
    }

    tracing::debug!("policy watch terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{named_policy, policy_with_rv};
    use warden_policy_controller_k8s_api::WorkloadPolicy;

    async fn route(events: Vec<watcher::Event<WorkloadPolicy>>) -> (Arc<WorkQueue<ResourceId>>, bool) {
        let queue = WorkQueue::new();
        let (ready_tx, ready_rx) = watch::channel(false);
        run(
            futures::stream::iter(events),
            queue.clone(),
            ready_tx,
            ControllerMetrics::default(),
        )
        .await;
        let ready = *ready_rx.borrow();
        (queue, ready)
    }

    #[tokio::test]
    async fn initial_list_enqueues_and_marks_ready() {
        let (queue, ready) = route(vec![
            watcher::Event::Init,
            watcher::Event::InitApply(named_policy("ns", "a")),
            watcher::Event::InitApply(named_policy("ns", "b")),
            watcher::Event::InitDone,
        ])
        .await;
        assert!(ready);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn status_only_update_does_not_enqueue() {
        let with_status = {
            let mut p = policy_with_rv("ns", "a", "2");
            p.status = Some(Default::default());
            p
        };
        let (queue, _) = route(vec![
            watcher::Event::Apply(policy_with_rv("ns", "a", "1")),
            watcher::Event::Apply(with_status),
        ])
        .await;
        // Only the first sighting is enqueued.
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn unchanged_resource_version_does_not_enqueue() {
        let mut changed = policy_with_rv("ns", "a", "1");
        changed.spec.policy.enforcer = "BPF".to_string();
        let (queue, _) = route(vec![
            watcher::Event::Apply(policy_with_rv("ns", "a", "1")),
            watcher::Event::Apply(changed),
        ])
        .await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn spec_change_enqueues_again() {
        let queue = WorkQueue::new();
        let (ready_tx, _ready_rx) = watch::channel(false);
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(1);
        let router = tokio::spawn(run(
            tokio_stream::wrappers::ReceiverStream::new(events_rx),
            queue.clone(),
            ready_tx,
            ControllerMetrics::default(),
        ));

        let id = ResourceId::namespaced("ns", "a");
        events_tx
            .send(watcher::Event::Apply(policy_with_rv("ns", "a", "1")))
            .await
            .unwrap();
        assert_eq!(queue.get().await, Some(id.clone()));
        queue.done(&id);

        let mut changed = policy_with_rv("ns", "a", "2");
        changed.spec.policy.enforcer = "BPF".to_string();
        events_tx.send(watcher::Event::Apply(changed)).await.unwrap();
        assert_eq!(queue.get().await, Some(id.clone()));
        queue.done(&id);

        drop(events_tx);
        router.await.unwrap();
    }

    #[tokio::test]
    async fn relist_without_a_key_enqueues_its_deletion() {
        let queue = WorkQueue::new();
        let (ready_tx, _ready_rx) = watch::channel(false);
        let (events_tx, events_rx) = tokio::sync::mpsc::channel(1);
        let router = tokio::spawn(run(
            tokio_stream::wrappers::ReceiverStream::new(events_rx),
            queue.clone(),
            ready_tx,
            ControllerMetrics::default(),
        ));

        let id = ResourceId::namespaced("ns", "a");
        events_tx
            .send(watcher::Event::Apply(policy_with_rv("ns", "a", "1")))
            .await
            .unwrap();
        assert_eq!(queue.get().await, Some(id.clone()));
        queue.done(&id);

        // The watch desyncs; the replayed list no longer carries the policy.
        events_tx.send(watcher::Event::Init).await.unwrap();
        events_tx.send(watcher::Event::InitDone).await.unwrap();
        assert_eq!(queue.get().await, Some(id.clone()));
        queue.done(&id);

        drop(events_tx);
        router.await.unwrap();
    }

    #[tokio::test]
    async fn relist_with_unchanged_key_does_not_enqueue() {
        let (queue, ready) = route(vec![
            watcher::Event::Apply(policy_with_rv("ns", "a", "1")),
            watcher::Event::Init,
            watcher::Event::InitApply(policy_with_rv("ns", "a", "1")),
            watcher::Event::InitDone,
        ])
        .await;
        assert!(ready);
        // Only the first sighting; the re-listed copy is neither an update
        // nor a deletion.
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn delete_always_enqueues() {
        let (queue, _) = route(vec![
            watcher::Event::Apply(policy_with_rv("ns", "a", "1")),
            watcher::Event::Delete(policy_with_rv("ns", "a", "1")),
        ])
        .await;
        // Coalesced with the pending add: one entry.
        assert_eq!(queue.len(), 1);
    }
}
