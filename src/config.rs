use crate::{
    backends::{BackendClient, ServiceType},
    models::{Credential, Endpoint, Pair},
    services::Storage,
};
use anyhow::{Context, Result, anyhow};
use std::{env, sync::Arc};

/// Construction config for one storage instance.
/// Read from `STORAGER_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service: ServiceType,
    pub pairs: Vec<Pair>,
}

impl ServiceConfig {
    /// Read `STORAGER_TYPE`, `STORAGER_NAME`, `STORAGER_CREDENTIAL`,
    /// `STORAGER_ENDPOINT`, `STORAGER_LOCATION` and `STORAGER_WORK_DIR`.
    pub fn from_env() -> Result<Self> {
        for key in [
            "STORAGER_TYPE",
            "STORAGER_NAME",
            "STORAGER_CREDENTIAL",
            "STORAGER_ENDPOINT",
            "STORAGER_LOCATION",
            "STORAGER_WORK_DIR",
        ] {
            if let Err(env::VarError::NotUnicode(_)) = env::var(key) {
                return Err(anyhow!("{} is not valid unicode", key));
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] over any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_type = lookup("STORAGER_TYPE").context("STORAGER_TYPE is not set")?;
        let service = raw_type
            .parse::<ServiceType>()
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("parsing STORAGER_TYPE value `{}`", raw_type))?;

        // Name is checked by negotiation, like every other required pair.
        let mut pairs = Vec::new();
        if let Some(name) = lookup("STORAGER_NAME") {
            pairs.push(Pair::name(name));
        }
        if let Some(raw) = lookup("STORAGER_CREDENTIAL") {
            let credential = raw
                .parse::<Credential>()
                .context("parsing STORAGER_CREDENTIAL")?;
            pairs.push(Pair::Credential(credential));
        }
        if let Some(raw) = lookup("STORAGER_ENDPOINT") {
            let endpoint = raw
                .parse::<Endpoint>()
                .with_context(|| format!("parsing STORAGER_ENDPOINT value `{}`", raw))?;
            pairs.push(Pair::Endpoint(endpoint));
        }
        if let Some(location) = lookup("STORAGER_LOCATION") {
            pairs.push(Pair::location(location));
        }
        if let Some(work_dir) = lookup("STORAGER_WORK_DIR") {
            pairs.push(Pair::work_dir(work_dir));
        }

        Ok(Self { service, pairs })
    }

    /// Build the storage instance around `client`.
    pub fn build(self, client: Arc<dyn BackendClient>) -> Result<Storage> {
        let service = self.service;
        Storage::new(service, client, self.pairs)
            .with_context(|| format!("configuring {} storage", service))
    }
}
