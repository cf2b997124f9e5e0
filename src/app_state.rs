use crate::{
    adapters::{BackendAdapter, NativeBridgeAdapter, NativeCallbacks, NativeRequest},
    config::{AdapterConfig, Config},
    services::{PurchaseService, PurchaseVerifier, VerificationClient},
    models::notification::StoreNotification,
    ui::TracingPurchaseUi,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Native store plumbing the host must connect when a bridge adapter is active
pub struct NativeBridge {
    pub requests: mpsc::UnboundedReceiver<NativeRequest>,
    pub callbacks: NativeCallbacks,
}

pub struct AppState {
    pub purchases: PurchaseService,
    /// Present for the google_play / app_store adapters
    pub native_bridge: Option<NativeBridge>,
    /// Subscribed before the startup catalog fetch
    pub notifications: broadcast::Receiver<StoreNotification>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);
        let mut builder = PurchaseService::builder(config.clone()).ui(Arc::new(TracingPurchaseUi));

        // Initialize verifier
        if config.verification.enabled {
            let verifier = VerificationClient::from_config(
                &config.verification,
                config.purchase.fake_purchases_enabled(),
            )?;
            builder = builder.verifier(Arc::new(verifier) as Arc<dyn PurchaseVerifier>);
        }

        // Initialize the adapter for the running platform
        let mut native_bridge = None;
        match config.store.active_adapter() {
            Some(AdapterConfig::Backend(backend)) => {
                let adapter = BackendAdapter::new(backend, builder.event_sink())?;
                builder = builder.adapter(Arc::new(adapter));
            }
            Some(adapter_config) => {
                let (adapter, requests) = NativeBridgeAdapter::new(adapter_config.platform());
                native_bridge = Some(NativeBridge {
                    requests,
                    callbacks: NativeCallbacks::new(builder.event_sink()),
                });
                builder = builder.adapter(Arc::new(adapter));
            }
            None => {
                tracing::warn!(
                    "No store adapter configured for platform {}",
                    config.store.active_platform_name()
                );
            }
        }

        let purchases = builder.spawn();
        let notifications = purchases.subscribe();
        purchases.request_all_products().await?;

        Ok(Self {
            purchases,
            native_bridge,
            notifications,
            config,
        })
    }
}
