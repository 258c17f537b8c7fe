//! Ticket exchange demo.
//!
//! Runs the reference sale against an in-memory settlement backend: primary
//! purchases, a swap, a resale, and the two classic rejections. Every
//! committed event is printed as one JSON line.

use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use ticket_exchange::{
    ExchangeConfig, ExchangeError, MockSettlement, Money, PartyId, TicketError, TicketExchange,
    TicketId,
};
use ticket_exchange_core::environment::SystemClock;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ExchangeConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        tickets = config.inventory.ticket_count,
        base_price = %config.base_price(),
        treasury = %config.inventory.treasury,
        "Configuration loaded"
    );

    let settlement = Arc::new(MockSettlement::new().with_latency(Duration::from_millis(5)));
    let exchange = TicketExchange::from_config(&config, Arc::new(SystemClock), settlement.clone());

    let mut events = exchange.subscribe_events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(error) => warn!(%error, "Could not serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    run_reference_sale(&exchange, config.inventory.ticket_count, config.base_price()).await?;

    let listings = exchange.check_resale().await;
    let unsold = exchange.unsold_count().await;
    let failed = exchange.failed_settlements().await;
    info!(
        unsold,
        listings = listings.len(),
        settlement_calls = settlement.calls().len(),
        failed_settlements = failed.len(),
        "Sale finished"
    );

    exchange
        .shutdown(config.store_config().shutdown_timeout)
        .await
        .context("exchange did not shut down cleanly")?;
    drop(exchange);
    event_log.await.context("event log task failed")?;
    Ok(())
}

async fn run_reference_sale(
    exchange: &TicketExchange,
    ticket_count: u32,
    price: Money,
) -> anyhow::Result<()> {
    if ticket_count < 3 {
        bail!("the reference sale needs at least 3 tickets, got {ticket_count}");
    }
    let resale_price = price
        .checked_add(price)
        .context("base price too large to double")?;

    let alice = PartyId::new();
    let bob = PartyId::new();
    let carol = PartyId::new();
    let (one, two) = (TicketId::new(1), TicketId::new(2));

    exchange.initialize(ticket_count, price).await?;

    // Primary sale
    exchange.buy_ticket(one, alice, price).await?.wait().await;
    exchange.buy_ticket(two, bob, price).await?.wait().await;

    // Swap: alice offers 1, bob gives 2 for it
    exchange.offer_swap(one, alice).await?;
    exchange.accept_swap(one, two, bob).await?;
    let (alice_holds, bob_holds) = (
        exchange.get_ticket_of(alice).await,
        exchange.get_ticket_of(bob).await,
    );
    info!(alice = ?alice_holds, bob = ?bob_holds, "Swap completed");

    // Resale: alice lists what she holds, carol buys it
    exchange.resale_ticket(resale_price, alice).await?;
    exchange
        .accept_resale(two, carol, resale_price)
        .await?
        .wait_with_timeout(Duration::from_secs(5))
        .await
        .context("resale settlement did not finish")?;
    let carol_holds = exchange.get_ticket_of(carol).await;
    info!(carol = ?carol_holds, "Resale completed");

    // Rejections leave everything as it was
    match exchange.buy_ticket(one, carol, price).await {
        Err(ExchangeError::Ticket(TicketError::TicketAlreadyOwned { .. })) => {
            info!("Buying an owned ticket was refused");
        },
        other => bail!("expected TicketAlreadyOwned, got {other:?}"),
    }
    match exchange
        .buy_ticket(TicketId::new(3), carol, Money::ZERO)
        .await
    {
        Err(error @ ExchangeError::Ticket(TicketError::InsufficientPayment { .. })) => {
            info!(%error, retryable = error.is_retryable(), "Underpayment was refused");
        },
        other => bail!("expected InsufficientPayment, got {other:?}"),
    }

    Ok(())
}
