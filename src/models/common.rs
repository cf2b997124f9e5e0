use serde::{Deserialize, Serialize};

/// Store platform an adapter talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePlatform {
    GooglePlay,
    AppStore,
    Backend,
}

impl StorePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GooglePlay => "google_play",
            Self::AppStore => "app_store",
            Self::Backend => "backend",
        }
    }
}

impl std::fmt::Display for StorePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build flavour; fake purchases are only honoured in development builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    #[default]
    Development,
    Shipping,
}

impl BuildProfile {
    pub fn is_shipping(&self) -> bool {
        matches!(self, Self::Shipping)
    }
}
