use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Layered configuration: `T::default()`, then the optional file, then
/// environment variables named `{PREFIX}_{FIELD}` (nested fields joined
/// with `__`, e.g. `FAUCET_LOGGING__LEVEL`).
pub fn load_layered<T, P>(path: Option<P>, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
    P: AsRef<Path>,
{
    let defaults = Config::try_from(&T::default()).context("Failed to serialize defaults")?;
    let mut builder = Config::builder().add_source(defaults);

    if let Some(path) = path {
        let path_str = path.as_ref().to_str().context("Invalid config path")?;
        builder = builder.add_source(File::with_name(path_str));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("Failed to build configuration")?;

    settings.try_deserialize::<T>().context("Failed to deserialize configuration")
}
