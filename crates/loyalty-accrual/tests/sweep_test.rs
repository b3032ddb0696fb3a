// Unprocessed-order sweep

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use loyalty_accrual::UnprocessedOrderSweep;
use loyalty_core::{AccrualTrigger, Ledger, OrderId, OrderStatus, UserId};
use loyalty_storage::InMemoryLedger;

#[derive(Default)]
struct RecordingTrigger {
    calls: Mutex<Vec<OrderId>>,
}

impl AccrualTrigger for RecordingTrigger {
    fn calculate_accrual(&self, order_id: &OrderId) {
        self.calls.lock().push(order_id.clone());
    }
}

async fn seeded_ledger() -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new());
    let user = UserId::new();

    for (id, status) in [
        ("0", OrderStatus::New),
        ("18", OrderStatus::Processing),
        ("79927398713", OrderStatus::Processed),
        ("4561261212345467", OrderStatus::Invalid),
    ] {
        let id = OrderId::new(id);
        ledger.create_order(&id, user).await.unwrap();
        ledger.update_order_status(&id, status).await.unwrap();
    }
    ledger
}

#[tokio::test]
async fn test_run_once_triggers_non_final_orders() {
    let ledger = seeded_ledger().await;
    let trigger = Arc::new(RecordingTrigger::default());
    let sweep = UnprocessedOrderSweep::new(ledger, trigger.clone(), Duration::from_secs(60));

    assert_eq!(sweep.run_once().await.unwrap(), 2);

    let mut calls = trigger.calls.lock().clone();
    calls.sort();
    assert_eq!(calls, vec![OrderId::new("0"), OrderId::new("18")]);
}

#[tokio::test]
async fn test_run_once_with_nothing_to_do() {
    let trigger = Arc::new(RecordingTrigger::default());
    let sweep = UnprocessedOrderSweep::new(
        Arc::new(InMemoryLedger::new()),
        trigger.clone(),
        Duration::from_secs(60),
    );

    assert_eq!(sweep.run_once().await.unwrap(), 0);
    assert!(trigger.calls.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawn_runs_immediately_then_periodically() {
    let ledger = seeded_ledger().await;
    let trigger = Arc::new(RecordingTrigger::default());
    let shutdown = CancellationToken::new();

    let handle = UnprocessedOrderSweep::new(ledger, trigger.clone(), Duration::from_secs(300))
        .spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(trigger.calls.lock().len(), 2);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(trigger.calls.lock().len(), 4);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_runs_single_pass() {
    let ledger = seeded_ledger().await;
    let trigger = Arc::new(RecordingTrigger::default());

    let handle = UnprocessedOrderSweep::new(ledger, trigger.clone(), Duration::ZERO)
        .spawn(CancellationToken::new());
    handle.await.unwrap();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(trigger.calls.lock().len(), 2);
}
