//! Action broadcast: observers see effect-produced actions, in order, after
//! they have been reduced.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use std::time::Duration;
use tripdesk_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use tripdesk_runtime::{Store, StoreError};

#[derive(Debug, Clone, PartialEq)]
enum QuoteAction {
    Request { trip: u32 },
    Quoted { trip: u32, cents: u64 },
    Unavailable { trip: u32 },
}

#[derive(Debug, Default)]
struct QuoteState {
    quotes: Vec<(u32, u64)>,
}

struct QuoteReducer;

impl Reducer for QuoteReducer {
    type State = QuoteState;
    type Action = QuoteAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut QuoteState,
        action: QuoteAction,
        _env: &(),
    ) -> SmallVec<[Effect<QuoteAction>; 4]> {
        match action {
            QuoteAction::Request { trip } => smallvec![Effect::Future(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if trip == 0 {
                    Some(QuoteAction::Unavailable { trip })
                } else {
                    Some(QuoteAction::Quoted {
                        trip,
                        cents: u64::from(trip) * 1_000,
                    })
                }
            }))],
            QuoteAction::Quoted { trip, cents } => {
                state.quotes.push((trip, cents));
                smallvec![Effect::None]
            },
            QuoteAction::Unavailable { .. } => smallvec![Effect::None],
        }
    }
}

#[tokio::test]
async fn subscribers_receive_effect_actions_only() {
    let store = Store::new(QuoteState::default(), QuoteReducer, ());
    let mut rx = store.subscribe_actions();

    let mut handle = store.send(QuoteAction::Request { trip: 7 }).unwrap();
    handle.wait().await;

    let observed = rx.recv().await.unwrap();
    assert_eq!(observed, QuoteAction::Quoted { trip: 7, cents: 7_000 });
    assert!(rx.try_recv().is_err(), "the initial request is not broadcast");
}

#[tokio::test]
async fn waiting_for_a_failure_action() {
    let store = Store::new(QuoteState::default(), QuoteReducer, ());

    let result = store
        .send_and_wait_for(
            QuoteAction::Request { trip: 0 },
            |a| matches!(a, QuoteAction::Quoted { .. } | QuoteAction::Unavailable { .. }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(result, QuoteAction::Unavailable { trip: 0 });
    assert!(store.state(|s| s.quotes.is_empty()));
}

#[tokio::test]
async fn waiting_times_out_without_a_match() {
    let store = Store::new(QuoteState::default(), QuoteReducer, ());

    let result = store
        .send_and_wait_for(
            QuoteAction::Request { trip: 3 },
            |a| matches!(a, QuoteAction::Unavailable { .. }),
            Duration::from_millis(50),
        )
        .await;

    assert_eq!(result, Err(StoreError::Timeout));
}
