// Publish coordination and disposition aggregation tests

mod common;

use common::{ScriptedPublisher, StalledPublisher};
use fluent_pubsub::pubsub::{PublishError, PublishHandle, StatusCode};
use fluent_pubsub::{Disposition, FlushContext, PublishCoordinator};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn disposition() -> impl Strategy<Value = Disposition> {
    prop_oneof![
        Just(Disposition::Accepted),
        Just(Disposition::RetryRequested),
        Just(Disposition::Fatal),
    ]
}

#[test]
fn test_fatal_dominates_retry() {
    use Disposition::*;

    assert_eq!(Disposition::worst([Accepted, RetryRequested]), RetryRequested);
    assert_eq!(Disposition::worst([RetryRequested, Fatal]), Fatal);
    assert_eq!(Disposition::worst([Fatal, RetryRequested, Accepted]), Fatal);
    assert_eq!(Disposition::worst([Accepted, Accepted]), Accepted);
}

#[test]
fn test_every_permutation_agrees() {
    use Disposition::*;

    let outcomes = [Accepted, RetryRequested, Fatal];
    let permutations = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in permutations {
        let permuted = order.map(|i| outcomes[i]);
        assert_eq!(Disposition::worst(permuted), Fatal);
    }
}

proptest! {
    #[test]
    fn prop_worst_is_order_independent(mut outcomes in prop::collection::vec(disposition(), 0..32)) {
        let forward = Disposition::worst(outcomes.clone());
        outcomes.reverse();
        prop_assert_eq!(forward, Disposition::worst(outcomes.clone()));
        outcomes.sort();
        prop_assert_eq!(forward, Disposition::worst(outcomes));
    }

    #[test]
    fn prop_combine_is_associative(a in disposition(), b in disposition(), c in disposition()) {
        prop_assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
    }
}

fn coordinator() -> PublishCoordinator {
    PublishCoordinator::new(Arc::new(ScriptedPublisher::new()))
}

#[tokio::test]
async fn test_await_all_empty_is_accepted() {
    let result = coordinator()
        .await_all(Vec::new(), &FlushContext::background())
        .await;
    assert_eq!(result, Disposition::Accepted);
}

#[tokio::test]
async fn test_await_all_takes_worst_outcome() {
    let handles = vec![
        PublishHandle::ready(Ok("1".to_string())),
        PublishHandle::ready(Err(PublishError::status(StatusCode::Unavailable, "busy"))),
        PublishHandle::ready(Ok("3".to_string())),
    ];
    let result = coordinator()
        .await_all(handles, &FlushContext::background())
        .await;
    assert_eq!(result, Disposition::RetryRequested);

    let handles = vec![
        PublishHandle::ready(Err(PublishError::status(StatusCode::Internal, "oops"))),
        PublishHandle::ready(Err(PublishError::Unclassified("???".to_string()))),
    ];
    let result = coordinator()
        .await_all(handles, &FlushContext::background())
        .await;
    assert_eq!(result, Disposition::Fatal);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expiry_requests_retry() {
    let publisher = Arc::new(StalledPublisher::new());
    let coordinator = PublishCoordinator::new(publisher);

    let handles = vec![
        PublishHandle::ready(Ok("done".to_string())),
        coordinator.submit(fluent_pubsub::OutboundMessage {
            attributes: Default::default(),
            data: bytes::Bytes::from_static(b"{}"),
        }),
    ];
    let ctx = FlushContext::with_timeout(Duration::from_secs(5));

    assert_eq!(
        coordinator.await_all(handles, &ctx).await,
        Disposition::RetryRequested
    );
}

#[tokio::test(start_paused = true)]
async fn test_fatal_survives_deadline_expiry() {
    let publisher = Arc::new(StalledPublisher::new());
    let coordinator = PublishCoordinator::new(publisher);

    let handles = vec![
        PublishHandle::ready(Err(PublishError::status(StatusCode::NotFound, "no topic"))),
        coordinator.submit(fluent_pubsub::OutboundMessage {
            attributes: Default::default(),
            data: bytes::Bytes::from_static(b"{}"),
        }),
    ];
    let ctx = FlushContext::with_timeout(Duration::from_secs(5));

    assert_eq!(coordinator.await_all(handles, &ctx).await, Disposition::Fatal);
}

#[tokio::test]
async fn test_cancellation_requests_retry() {
    let publisher = Arc::new(StalledPublisher::new());
    let coordinator = PublishCoordinator::new(publisher);
    let handle = coordinator.submit(fluent_pubsub::OutboundMessage {
        attributes: Default::default(),
        data: bytes::Bytes::from_static(b"{}"),
    });

    let ctx = FlushContext::background();
    ctx.cancellation_token().cancel();

    assert_eq!(
        coordinator.await_all(vec![handle], &ctx).await,
        Disposition::RetryRequested
    );
}

/// Handles for `outcomes` in order; `None` stays in flight until `replies` is dropped
fn handles_for(
    outcomes: &[Option<Disposition>],
    replies: &mut Vec<fluent_pubsub::pubsub::PublishReply>,
) -> Vec<PublishHandle> {
    outcomes
        .iter()
        .map(|outcome| match outcome {
            Some(Disposition::Accepted) => PublishHandle::ready(Ok("ok".to_string())),
            Some(Disposition::RetryRequested) => {
                PublishHandle::ready(Err(PublishError::status(StatusCode::Unavailable, "busy")))
            }
            Some(Disposition::Fatal) => {
                PublishHandle::ready(Err(PublishError::status(StatusCode::NotFound, "no topic")))
            }
            None => {
                let (reply, handle) = PublishHandle::channel();
                replies.push(reply);
                handle
            }
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_settled_fatal_counts_regardless_of_position() {
    let coordinator = PublishCoordinator::new(Arc::new(StalledPublisher::new()));

    for outcomes in [
        [Some(Disposition::Fatal), None],
        [None, Some(Disposition::Fatal)],
    ] {
        let mut replies = Vec::new();
        let handles = handles_for(&outcomes, &mut replies);
        let ctx = FlushContext::with_timeout(Duration::from_secs(1));

        assert_eq!(
            coordinator.await_all(handles, &ctx).await,
            Disposition::Fatal,
            "outcomes {:?}",
            outcomes
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_await_all_is_order_independent_under_deadline() {
    use Disposition::*;

    let coordinator = PublishCoordinator::new(Arc::new(StalledPublisher::new()));
    let outcomes = [Some(Accepted), None, Some(RetryRequested), Some(Fatal)];

    let mut results = Vec::new();
    for rotation in 0..outcomes.len() {
        for reversed in [false, true] {
            let mut order = outcomes.to_vec();
            order.rotate_left(rotation);
            if reversed {
                order.reverse();
            }

            let mut replies = Vec::new();
            let handles = handles_for(&order, &mut replies);
            let ctx = FlushContext::with_timeout(Duration::from_millis(100));
            results.push(coordinator.await_all(handles, &ctx).await);
        }
    }

    assert!(results.iter().all(|r| *r == Fatal), "{:?}", results);
}

#[tokio::test]
async fn test_cancelled_context_still_counts_settled_handles() {
    let coordinator = PublishCoordinator::new(Arc::new(StalledPublisher::new()));
    let ctx = FlushContext::background();
    ctx.cancellation_token().cancel();

    let mut replies = Vec::new();
    let handles = handles_for(&[Some(Disposition::Accepted), None], &mut replies);
    assert_eq!(
        coordinator.await_all(handles, &ctx).await,
        Disposition::RetryRequested
    );

    let handles = handles_for(&[None, Some(Disposition::Fatal)], &mut replies);
    assert_eq!(coordinator.await_all(handles, &ctx).await, Disposition::Fatal);
}
