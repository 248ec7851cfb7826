//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (~/.config/instance-ops/config.toml)
//! 3. Explicit `--config` file
//! 4. Environment (`INSTANCE_OPS_<SECTION>__<KEY>`)
//! 5. CLI flags

mod effective;
mod env;
mod merge;
mod settings;

pub use effective::{ConfigError, ConfigLayers, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use env::{env_layer, ENV_PREFIX};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    GatewaySettings, LogSettings, NotifyBackend, NotifySettings, Settings, StoreBackend,
    StoreSettings, TrackingSettings, MAX_RETRIES_LIMIT,
};
