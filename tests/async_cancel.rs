//! Runs alone because it inspects the process-wide handle tables.

use std::time::Duration;

use futures_util::FutureExt;
use wirecall::async_call::{pending_calls, registered_event_loops};
use wirecall::pointers::PointerStrategy;
use wirecall::{Component, Value};

#[tokio::test]
async fn dropping_the_future_still_releases_handles() {
    let arg = Value::List(vec![Value::from(1u8), Value::from(2u8)]);

    for strategy in [PointerStrategy::Table, PointerStrategy::Direct] {
        let component = Component::in_process().unwrap().with_pointer_strategy(strategy);
        let call = component.test_fn_async(&arg);
        // One poll starts the native call; the result has not been delivered yet.
        assert!(Box::pin(call).as_mut().now_or_never().is_none());

        tokio::time::timeout(Duration::from_secs(5), async {
            while pending_calls() != 0 || registered_event_loops() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{strategy:?}: completion callback left handles registered"));
    }
}
