use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use validator::Validate;

use crate::{
    error::{PurchaseError, Result},
    models::{
        common::{BuildProfile, StorePlatform},
        product::ProductId,
        session::PurchaseRequest,
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub purchase: PurchaseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Key into `adapters`; defaults to the OS the binary runs on
    #[serde(default)]
    pub platform: Option<String>,
    /// Products requested at startup, in order
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub items: Vec<ShopItemConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ShopItemConfig {
    #[validate(length(min = 1, max = 128))]
    pub tag: String,
    #[validate(length(min = 1, max = 256))]
    pub product_id: String,
    #[serde(default = "default_consumable")]
    pub consumable: bool,
    /// Per-item opt out of backend verification
    #[serde(default)]
    pub skip_verification: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    GooglePlay,
    AppStore,
    Backend(BackendAdapterConfig),
}

impl AdapterConfig {
    pub fn platform(&self) -> StorePlatform {
        match self {
            AdapterConfig::GooglePlay => StorePlatform::GooglePlay,
            AdapterConfig::AppStore => StorePlatform::AppStore,
            AdapterConfig::Backend(_) => StorePlatform::Backend,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BackendAdapterConfig {
    #[validate(url)]
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[validate(url)]
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            auth_token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseConfig {
    #[serde(default)]
    pub build_profile: BuildProfile,
    /// Bypass the store entirely in development builds
    #[serde(default)]
    pub fake_purchases_in_dev_build: bool,
    /// Catalog updates a session may wait through before failing; 0 waits on the timeout alone
    #[serde(default = "default_catalog_wait_max_updates")]
    pub catalog_wait_max_updates: u32,
    #[serde(default = "default_catalog_wait_timeout_ms")]
    pub catalog_wait_timeout_ms: Option<u64>,
    /// How long an item stays unbuyable after finalize if the store never confirms
    #[serde(default = "default_finalize_cooldown_ms")]
    pub finalize_cooldown_ms: u64,
    #[serde(default = "default_settled_transaction_capacity")]
    pub settled_transaction_capacity: usize,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            build_profile: BuildProfile::default(),
            fake_purchases_in_dev_build: false,
            catalog_wait_max_updates: default_catalog_wait_max_updates(),
            catalog_wait_timeout_ms: default_catalog_wait_timeout_ms(),
            finalize_cooldown_ms: default_finalize_cooldown_ms(),
            settled_transaction_capacity: default_settled_transaction_capacity(),
        }
    }
}

fn default_consumable() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_catalog_wait_max_updates() -> u32 {
    3
}

fn default_catalog_wait_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_finalize_cooldown_ms() -> u64 {
    2_000
}

fn default_settled_transaction_capacity() -> usize {
    256
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("STORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse an inline YAML document, without environment overrides
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for item in &self.store.items {
            item.validate().map_err(|e| {
                PurchaseError::Misconfigured(format!("shop item {:?}: {}", item.tag, e))
            })?;
        }

        for (name, adapter) in &self.store.adapters {
            if let AdapterConfig::Backend(backend) = adapter {
                backend.validate().map_err(|e| {
                    PurchaseError::Misconfigured(format!("adapter {}: {}", name, e))
                })?;
            }
        }

        self.verification
            .validate()
            .map_err(|e| PurchaseError::Misconfigured(format!("verification: {}", e)))?;

        if self.verification.enabled {
            if self.verification.url.is_none() {
                return Err(PurchaseError::Misconfigured(
                    "verification enabled without url".to_string(),
                ));
            }
            if self.verification.auth_token.is_none() {
                return Err(PurchaseError::Misconfigured(
                    "verification enabled without auth_token".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl StoreConfig {
    pub fn active_platform_name(&self) -> String {
        self.platform
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_string())
    }

    pub fn active_adapter(&self) -> Option<&AdapterConfig> {
        self.adapters.get(&self.active_platform_name())
    }

    pub fn find_item(&self, product_id: &ProductId) -> Option<&ShopItemConfig> {
        self.items
            .iter()
            .find(|item| item.product_id == product_id.as_str())
    }

    /// Resolve a buy against the configured shop items
    pub fn purchase_request(&self, product_id: &ProductId) -> PurchaseRequest {
        match self.find_item(product_id) {
            Some(item) => PurchaseRequest {
                product_id: product_id.clone(),
                tag: item.tag.clone(),
                consumable: Some(item.consumable),
                skip_verification: item.skip_verification,
            },
            None => PurchaseRequest::unconfigured(product_id.clone()),
        }
    }

    /// Configured product ids followed by item products not listed there
    pub fn prefetch_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = Vec::new();
        let listed = self.product_ids.iter().map(String::as_str);
        let from_items = self.items.iter().map(|item| item.product_id.as_str());

        for id in listed.chain(from_items) {
            let id = ProductId::from(id);
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }

        ids
    }

    /// Non-consumable products the store can restore
    pub fn restorable_ids(&self) -> Vec<ProductId> {
        self.items
            .iter()
            .filter(|item| !item.consumable)
            .map(|item| ProductId::from(item.product_id.as_str()))
            .collect()
    }
}

impl PurchaseConfig {
    pub fn fake_purchases_enabled(&self) -> bool {
        !self.build_profile.is_shipping() && self.fake_purchases_in_dev_build
    }

    pub fn catalog_wait_timeout(&self) -> Option<Duration> {
        self.catalog_wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn finalize_cooldown(&self) -> Duration {
        Duration::from_millis(self.finalize_cooldown_ms)
    }
}
