mod settings;

pub use settings::{CacheConfig, ProviderConfig, QuotaConfig, Settings, StoreConfig};
