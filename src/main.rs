use mobile_store_purchase::{AppState, Config, StoreNotification};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CATALOG_WAIT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mobile_store_purchase=debug".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting store probe");

    // Load configuration
    let config = Config::load()?;

    tracing::info!(
        "Loaded configuration - Platform: {}, {} shop items",
        config.store.active_platform_name(),
        config.store.items.len()
    );

    let mut state = AppState::new(config).await?;
    let purchases = state.purchases.clone();
    let notifications = &mut state.notifications;

    if state.native_bridge.is_some() {
        tracing::warn!("Native store adapter active; no host is attached to answer it");
    }

    // Wait for the startup catalog fetch
    let waited = tokio::time::timeout(CATALOG_WAIT, async {
        loop {
            match notifications.recv().await {
                Ok(StoreNotification::CatalogUpdated) => return true,
                Ok(StoreNotification::CatalogFetchFailed { reason }) => {
                    tracing::warn!("Catalog fetch failed: {}", reason);
                    return false;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    if !waited {
        tracing::warn!("No catalog received");
    }

    for product_id in state.config.store.prefetch_ids() {
        let price = purchases.price(product_id.clone()).await?;
        match purchases.offer(product_id.clone()).await? {
            Some(offer) => tracing::info!(
                product_id = %product_id,
                price,
                price_text = %offer.price_text,
                currency = %offer.currency_code,
                available = offer.available,
                "Offer"
            ),
            None => tracing::info!(product_id = %product_id, "No offer"),
        }
    }

    let Some(product_id) = std::env::args().nth(1) else {
        return Ok(());
    };

    let ticket = match purchases.buy(product_id.as_str()).await {
        Ok(ticket) => ticket,
        Err(e) if e.is_start_rejection() => {
            tracing::warn!(code = e.code(), "Buy rejected: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    match ticket.outcome().await {
        Ok(receipt) => tracing::info!(
            product_id = %receipt.product_id,
            receipt = %receipt.fingerprint(),
            "Purchase succeeded"
        ),
        Err(e) => tracing::warn!(code = e.code(), "Purchase failed: {}", e),
    }

    Ok(())
}
