mod common;

use pool_accounting::confirmation::Outcome;
use pool_accounting::database::{BalanceStatus, ShareStatus, Store, WindowState};
use pool_accounting::ledger::BalanceLedger;
use pool_accounting::oracle::BlockDepth;
use pool_accounting::payout::RewardAlgorithm;
use pool_accounting::PoolError;

use common::{config, harness, Harness};

/// Alice submits 3 valid shares, bob 1, then bob solves the block.
async fn reference_round(h: &Harness) {
    h.valid("alice", "a1").await;
    h.valid("alice", "a2").await;
    h.valid("alice", "a3").await;
    h.valid("bob", "b1").await;
    h.solve("bob", "b2", "block-1").await;
}

#[tokio::test]
async fn test_prop_reference_round() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;

    let report = h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.pending, 0);

    assert_eq!(h.credits("alice").await, 75);
    assert_eq!(h.credits("bob").await, 25);

    let window = h.coordinator.get_window(1).await.unwrap();
    assert_eq!(window.state, WindowState::Settled);
    assert_eq!(window.credited, 100);
    assert_eq!(window.retained, 0);
}

#[tokio::test]
async fn test_pps_reference_round() {
    let h = harness(config(RewardAlgorithm::Pps), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.coordinator.poll_confirmations().await.unwrap();

    assert_eq!(h.credits("alice").await, 30);
    assert_eq!(h.credits("bob").await, 10);
}

#[tokio::test]
async fn test_pplns_reference_round() {
    let h = harness(config(RewardAlgorithm::Pplns), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.coordinator.poll_confirmations().await.unwrap();

    assert_eq!(h.credits("alice").await, 75);
    assert_eq!(h.credits("bob").await, 25);
}

#[tokio::test]
async fn test_pplns_reaches_into_previous_windows() {
    let h = harness(config(RewardAlgorithm::Pplns), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.valid("bob", "b3").await;
    h.valid("bob", "b4").await;
    h.solve("alice", "a4", "block-2").await;

    let report = h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(report.settled, 2);

    // Window 2: bob's 2 shares plus the last 2 of window 1 (alice a3, bob b1)
    let window_2 = h.store.window_balances(2).await.unwrap();
    let amount = |miner: &str| {
        window_2
            .iter()
            .find(|e| e.miner_address == miner)
            .map(|e| e.amount)
            .unwrap_or(0)
    };
    assert_eq!(amount("bob"), 75);
    assert_eq!(amount("alice"), 25);
}

#[tokio::test]
async fn test_prop_split_has_no_rounding_loss() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob", "carol"]).await;
    h.valid("alice", "1").await;
    h.valid("bob", "2").await;
    h.valid("carol", "3").await;
    h.solve("carol", "4", "block-1").await;
    h.coordinator.poll_confirmations().await.unwrap();

    let total = h.credits("alice").await + h.credits("bob").await + h.credits("carol").await;
    assert_eq!(total, 100);
    assert_eq!(h.coordinator.get_window(1).await.unwrap().credited, 100);
}

#[tokio::test]
async fn test_orphaned_block_voids_window() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.oracle.set("block-1", BlockDepth::Orphaned);

    let report = h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(report.voided, 1);
    assert_eq!(h.coordinator.get_window(1).await.unwrap().state, WindowState::Voided);
    assert!(h.store.window_balances(1).await.unwrap().is_empty());
    assert_eq!(h.credits("alice").await, 0);

    // A voided window is final
    h.oracle.set("block-1", BlockDepth::Confirmed(1000));
    assert_eq!(h.coordinator.evaluate_window(1).await.unwrap(), Outcome::AlreadyFinal);
    assert!(h.store.window_balances(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shallow_block_waits() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.oracle.set("block-1", BlockDepth::Confirmed(9));

    let report = h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(report.pending, 1);
    assert_eq!(
        h.coordinator.get_window(1).await.unwrap().state,
        WindowState::PendingConfirmation
    );

    h.oracle.set("block-1", BlockDepth::Confirmed(10));
    assert_eq!(h.coordinator.poll_confirmations().await.unwrap().settled, 1);
}

#[tokio::test]
async fn test_oracle_outage_leaves_windows_pending() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.oracle.set_unavailable(true);

    let report = h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(report.settled + report.voided, 0);
    assert!(matches!(
        h.coordinator.evaluate_window(1).await,
        Err(PoolError::OracleUnavailable(_))
    ));
    assert_eq!(
        h.coordinator.get_window(1).await.unwrap().state,
        WindowState::PendingConfirmation
    );

    h.oracle.set_unavailable(false);
    assert_eq!(h.coordinator.poll_confirmations().await.unwrap().settled, 1);
}

#[tokio::test]
async fn test_waiting_window_holds_back_later_windows() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.valid("alice", "a9").await;
    h.solve("alice", "a10", "block-2").await;
    h.oracle.set("block-1", BlockDepth::Confirmed(3));

    let report = h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(report.pending, 2);
    assert_eq!(
        h.coordinator.get_window(2).await.unwrap().state,
        WindowState::PendingConfirmation
    );
}

#[tokio::test]
async fn test_repeated_settlement_is_idempotent() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;

    assert_eq!(h.coordinator.evaluate_window(1).await.unwrap(), Outcome::Settle);
    assert_eq!(h.coordinator.evaluate_window(1).await.unwrap(), Outcome::AlreadyFinal);
    h.coordinator.poll_confirmations().await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.evaluate_window(1).await })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), Outcome::AlreadyFinal);
    }

    assert_eq!(h.store.window_balances(1).await.unwrap().len(), 2);
    assert_eq!(h.credits("alice").await, 75);
}

#[tokio::test]
async fn test_duplicate_nonce_is_repetitious_and_unpaid() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    let first = h.valid("alice", "n1").await;
    let second = h.valid("bob", "n1").await;
    let third = h.valid("alice", "n1").await;
    h.valid("bob", "n2").await;

    assert_eq!(first.status, ShareStatus::Valid);
    assert_eq!(second.status, ShareStatus::Repetitious);
    assert_eq!(third.status, ShareStatus::Repetitious);

    h.solve("bob", "n3", "block-1").await;
    // Nonces stay taken after the window closes
    assert_eq!(h.valid("alice", "n1").await.status, ShareStatus::Repetitious);

    h.coordinator.poll_confirmations().await.unwrap();
    assert_eq!(h.credits("alice").await, 50);
    assert_eq!(h.credits("bob").await, 50);
}

#[tokio::test]
async fn test_window_without_eligible_shares_settles_empty() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice"]).await;
    h.invalid("alice", "x1").await;
    h.solve("alice", "x2", "block-1").await;

    assert_eq!(h.coordinator.poll_confirmations().await.unwrap().settled, 1);
    let window = h.coordinator.get_window(1).await.unwrap();
    assert_eq!(window.state, WindowState::Settled);
    assert_eq!(window.credited, 0);
    assert_eq!(h.credits("alice").await, 0);
}

#[tokio::test]
async fn test_withdrawal_leaves_pending_untouched() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.coordinator.poll_confirmations().await.unwrap();

    // A credit whose confirmation has not happened yet
    let ledger = BalanceLedger::new(h.store.clone());
    let pending = ledger.credit("alice", 40, 99).await.unwrap();
    assert_eq!(pending.status, BalanceStatus::Pending);

    let withdrawal = h.coordinator.withdraw("alice").await.unwrap();
    assert_eq!(withdrawal.amount, 75);
    assert!(!withdrawal.entries.contains(&pending.id));

    let untouched = h.store.get_balance(&pending.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, BalanceStatus::Pending);
    assert_eq!(untouched.amount, 40);

    let totals = h.coordinator.balance_totals("alice").await.unwrap();
    assert_eq!(totals.pending, 40);
    assert_eq!(totals.confirmed, 0);
    assert_eq!(totals.withdrawn, 75);

    // Nothing confirmed is left, so a second request fails
    assert!(matches!(
        h.coordinator.withdraw("alice").await,
        Err(PoolError::NoConfirmedBalance(_))
    ));
}

#[tokio::test]
async fn test_unsettled_window_is_not_withdrawable() {
    let h = harness(config(RewardAlgorithm::Prop), &["alice", "bob"]).await;
    reference_round(&h).await;
    h.coordinator.poll_confirmations().await.unwrap();

    // Window 2 closes but its block is not deep enough yet
    h.valid("alice", "c1").await;
    h.solve("bob", "c2", "block-2").await;
    h.oracle.set("block-2", BlockDepth::Confirmed(1));
    h.coordinator.poll_confirmations().await.unwrap();

    let withdrawal = h.coordinator.withdraw("alice").await.unwrap();
    assert_eq!(withdrawal.amount, 75);
    assert!(matches!(
        h.coordinator.withdraw("alice").await,
        Err(PoolError::NoConfirmedBalance(_))
    ));

    h.oracle.set("block-2", BlockDepth::Confirmed(10));
    h.coordinator.poll_confirmations().await.unwrap();
    let totals = h.coordinator.balance_totals("alice").await.unwrap();
    assert_eq!(totals.confirmed, 100);
    assert_eq!(totals.withdrawn, 75);
}
