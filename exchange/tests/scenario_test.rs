//! End-to-end sale scenarios through the `TicketExchange` facade.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;
use ticket_exchange::{
    ExchangeError, MockSettlement, Money, Owner, PartyId, ResaleEntry, SettlementError,
    SettlementInstruction,
    SwapOfferView, TicketAction, TicketError, TicketExchange, TicketId, TicketSaleEnvironment,
};
use ticket_exchange_runtime::StoreConfig;
use ticket_exchange_testing::{init_test_tracing, test_clock};

const PRICE: Money = Money::from_cents(1);
const RESALE_PRICE: Money = Money::from_cents(2);

struct Harness {
    exchange: TicketExchange,
    settlement: Arc<MockSettlement>,
    treasury: PartyId,
}

fn harness_with(settlement: MockSettlement) -> Harness {
    init_test_tracing();
    let settlement = Arc::new(settlement);
    let treasury = PartyId::new();
    let environment =
        TicketSaleEnvironment::new(Arc::new(test_clock()), settlement.clone(), treasury);
    Harness {
        exchange: TicketExchange::new(environment, StoreConfig::default()),
        settlement,
        treasury,
    }
}

async fn opened_sale() -> Harness {
    let harness = harness_with(MockSettlement::new());
    harness.exchange.initialize(100, PRICE).await.unwrap();
    harness
}

fn ticket(number: u32) -> TicketId {
    TicketId::new(number)
}

#[tokio::test]
async fn buy_ticket_assigns_owner_and_pays_treasury() {
    let Harness {
        exchange,
        settlement,
        treasury,
    } = opened_sale().await;
    let alice = PartyId::new();

    let mut handle = exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    assert_eq!(exchange.get_ticket_of(alice).await, Some(ticket(1)));
    assert_eq!(exchange.owner_of(ticket(1)).await, Ok(Owner::Party(alice)));
    assert_eq!(exchange.unsold_count().await, 99);
    assert_eq!(
        settlement.calls(),
        vec![SettlementInstruction::Transfer { from: alice, to: treasury, amount: PRICE }]
    );
    assert_eq!(exchange.snapshot().await.settlements_confirmed, 1);
}

#[tokio::test]
async fn swap_round_trip_exchanges_tickets() {
    let Harness { exchange, .. } = opened_sale().await;
    let alice = PartyId::new();
    let bob = PartyId::new();
    exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    exchange.buy_ticket(ticket(2), bob, PRICE).await.unwrap();

    exchange.offer_swap(ticket(1), alice).await.unwrap();
    assert_eq!(
        exchange.get_swap_offer(ticket(1)).await,
        Some(SwapOfferView { offerer: alice, active: true })
    );
    exchange.swap_tickets(ticket(1), ticket(2), bob).await.unwrap();

    assert_eq!(exchange.get_ticket_of(alice).await, Some(ticket(2)));
    assert_eq!(exchange.get_ticket_of(bob).await, Some(ticket(1)));
    assert_eq!(exchange.get_swap_offer(ticket(1)).await, None);
    assert_eq!(exchange.get_swap_offer(ticket(2)).await, None);
}

#[tokio::test]
async fn resale_moves_ticket_and_pays_lister() {
    let Harness {
        exchange,
        settlement,
        ..
    } = opened_sale().await;
    let alice = PartyId::new();
    let bob = PartyId::new();
    let carol = PartyId::new();
    exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    exchange.buy_ticket(ticket(2), bob, PRICE).await.unwrap();
    exchange.offer_swap(ticket(1), alice).await.unwrap();
    exchange.accept_swap(ticket(1), ticket(2), bob).await.unwrap();

    exchange.resale_ticket(RESALE_PRICE, alice).await.unwrap();
    assert_eq!(
        exchange.check_resale().await,
        vec![ResaleEntry { ticket_id: ticket(2), price: RESALE_PRICE, lister: alice }]
    );

    let mut handle = exchange
        .accept_resale(ticket(2), carol, RESALE_PRICE)
        .await
        .unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    assert_eq!(exchange.get_ticket_of(carol).await, Some(ticket(2)));
    assert_eq!(exchange.get_ticket_of(alice).await, None);
    assert!(exchange.check_resale().await.is_empty());
    assert_eq!(settlement.received_by(alice), RESALE_PRICE);
}

#[tokio::test]
async fn failures_leave_state_unchanged() {
    let Harness { exchange, .. } = opened_sale().await;
    let alice = PartyId::new();
    let bob = PartyId::new();
    exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap().wait().await;
    let before = exchange.snapshot().await;

    let owned = exchange.buy_ticket(ticket(1), bob, PRICE).await.unwrap_err();
    assert_eq!(owned, ExchangeError::Ticket(TicketError::TicketAlreadyOwned { ticket_id: ticket(1) }));
    assert!(!owned.is_retryable());

    let underpaid = exchange.buy_ticket(ticket(3), bob, Money::ZERO).await.unwrap_err();
    assert!(matches!(
        underpaid.ticket_error(),
        Some(TicketError::InsufficientPayment { .. })
    ));
    assert!(underpaid.is_retryable());

    let unknown = exchange.buy_ticket(ticket(101), bob, PRICE).await.unwrap_err();
    assert_eq!(unknown.ticket_error(), Some(&TicketError::UnknownTicket { ticket_id: ticket(101) }));

    assert_eq!(exchange.snapshot().await, before);
}

#[tokio::test]
async fn overpayment_is_refunded_to_buyer() {
    let Harness {
        exchange,
        settlement,
        treasury,
    } = opened_sale().await;
    let alice = PartyId::new();

    let mut handle = exchange
        .buy_ticket(ticket(5), alice, Money::from_cents(10))
        .await
        .unwrap();
    handle.wait().await;

    assert_eq!(
        settlement.calls(),
        vec![
            SettlementInstruction::Transfer { from: alice, to: treasury, amount: PRICE },
            SettlementInstruction::Refund { to: alice, amount: Money::from_cents(9) },
        ]
    );
}

#[tokio::test]
async fn settlement_failure_is_journaled_not_rolled_back() {
    let Harness { exchange, .. } = harness_with(MockSettlement::failing());
    exchange.initialize(3, PRICE).await.unwrap();
    let alice = PartyId::new();

    let mut handle = exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    assert_eq!(exchange.owner_of(ticket(1)).await, Ok(Owner::Party(alice)));
    let failed = exchange.failed_settlements().await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].ticket_id, ticket(1));
}

#[tokio::test]
async fn minted_ticket_can_be_bought_through_its_listing() {
    let harness = harness_with(MockSettlement::new());
    let exchange = &harness.exchange;
    exchange.initialize(1, PRICE).await.unwrap();
    let owner = PartyId::new();
    let other = PartyId::new();

    exchange.mint_ticket(owner, ticket(1)).await.unwrap();
    let refused = exchange.buy_ticket(ticket(1), other, PRICE).await.unwrap_err();
    assert_eq!(refused.to_string(), "Ticket 1 already owned");

    exchange.list_for_resale(ticket(1), RESALE_PRICE, owner).await.unwrap();
    exchange.buy_ticket(ticket(1), other, RESALE_PRICE).await.unwrap();
    assert_eq!(exchange.get_ticket_owner(ticket(1)).await, Ok(Owner::Party(other)));
}

#[tokio::test]
async fn stale_listing_is_refused_after_round_trip() {
    let Harness { exchange, .. } = opened_sale().await;
    let alice = PartyId::new();
    let bob = PartyId::new();
    exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    exchange.buy_ticket(ticket(2), bob, PRICE).await.unwrap();

    exchange.list_for_resale(ticket(1), RESALE_PRICE, alice).await.unwrap();

    // Ticket 1 goes to bob and back to alice through two swaps
    exchange.offer_swap(ticket(1), alice).await.unwrap();
    exchange.accept_swap(ticket(1), ticket(2), bob).await.unwrap();
    exchange.offer_swap(ticket(1), bob).await.unwrap();
    exchange.accept_swap(ticket(1), ticket(2), alice).await.unwrap();
    assert_eq!(exchange.owner_of(ticket(1)).await, Ok(Owner::Party(alice)));

    assert!(exchange.check_resale().await.is_empty());
    let error = exchange
        .accept_resale(ticket(1), PartyId::new(), RESALE_PRICE)
        .await
        .unwrap_err();
    assert_eq!(error, ExchangeError::Ticket(TicketError::StaleListing { ticket_id: ticket(1) }));
}

#[tokio::test]
async fn cancelled_offer_cannot_be_accepted() {
    let Harness { exchange, .. } = opened_sale().await;
    let alice = PartyId::new();
    let bob = PartyId::new();
    exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    exchange.buy_ticket(ticket(2), bob, PRICE).await.unwrap();
    exchange.offer_swap(ticket(1), alice).await.unwrap();

    let not_offerer = exchange.cancel_swap_offer(ticket(1), bob).await.unwrap_err();
    assert!(matches!(not_offerer.ticket_error(), Some(TicketError::NotOwner { .. })));

    exchange.cancel_swap_offer(ticket(1), alice).await.unwrap();
    let error = exchange.accept_swap(ticket(1), ticket(2), bob).await.unwrap_err();
    assert_eq!(error, ExchangeError::Ticket(TicketError::NoActiveOffer { ticket_id: ticket(1) }));
}

#[tokio::test]
async fn subscribers_see_events_in_commit_order() {
    let Harness { exchange, .. } = opened_sale().await;
    let mut events = exchange.subscribe_events();
    let alice = PartyId::new();

    exchange.buy_ticket(ticket(1), alice, PRICE).await.unwrap();
    exchange.list_for_resale(ticket(1), RESALE_PRICE, alice).await.unwrap();
    exchange.cancel_resale(ticket(1), alice).await.unwrap();
    // Rejected: publishes nothing
    exchange.cancel_resale(ticket(1), alice).await.unwrap_err();

    let mut names = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.is_event());
        names.push(event.event_type());
    }
    assert_eq!(
        names,
        vec!["TicketPurchased.v1", "ResaleListed.v1", "ResaleCancelled.v1"]
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn events_serialize_to_json() {
    let Harness { exchange, .. } = opened_sale().await;
    let mut events = exchange.subscribe_events();
    exchange.buy_ticket(ticket(7), PartyId::new(), PRICE).await.unwrap();

    let event = events.recv().await.unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["TicketPurchased"]["ticket_id"], 7);
    assert_eq!(json["TicketPurchased"]["price"], 1);

    let back: TicketAction = serde_json::from_value(json).unwrap();
    assert_eq!(back, event);
}

#[tokio::test]
async fn shutdown_refuses_new_commands() {
    let Harness { exchange, .. } = opened_sale().await;
    exchange.shutdown(Duration::from_secs(1)).await.unwrap();

    let error = exchange
        .buy_ticket(ticket(1), PartyId::new(), PRICE)
        .await
        .unwrap_err();
    assert_eq!(error, ExchangeError::ShuttingDown);
    assert_eq!(exchange.owner_of(ticket(1)).await, Ok(Owner::Unsold));
}

#[tokio::test]
async fn settlement_failing_during_shutdown_is_still_journaled() {
    let Harness { exchange, settlement, .. } =
        harness_with(MockSettlement::failing().with_latency(Duration::from_millis(50)));
    exchange.initialize(3, PRICE).await.unwrap();

    exchange.buy_ticket(ticket(1), PartyId::new(), PRICE).await.unwrap();
    exchange.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(settlement.calls().len(), 1);
    let failed = exchange.failed_settlements().await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].ticket_id, ticket(1));
}

#[tokio::test]
async fn refund_is_not_sent_after_declined_transfer() {
    let Harness { exchange, settlement, treasury } = harness_with(MockSettlement::failing());
    exchange.initialize(3, PRICE).await.unwrap();
    let alice = PartyId::new();

    let mut handle = exchange
        .buy_ticket(ticket(2), alice, Money::from_cents(10))
        .await
        .unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        settlement.calls(),
        vec![SettlementInstruction::Transfer { from: alice, to: treasury, amount: PRICE }]
    );
    let failed = exchange.failed_settlements().await;
    assert_eq!(failed.len(), 2);
    assert!(matches!(failed[0].error, SettlementError::Declined { .. }));
    assert_eq!(
        failed[1].instruction,
        SettlementInstruction::Refund { to: alice, amount: Money::from_cents(9) }
    );
    assert_eq!(failed[1].error, SettlementError::Skipped);
}
