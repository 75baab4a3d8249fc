pub mod aggregator;
pub mod api;
pub mod assembler;
pub mod cache;
pub mod config;
pub mod date_range;
pub mod derived;
pub mod directory;
pub mod error;
pub mod organizations;
pub mod sources;

use std::sync::Arc;

use aggregator::Aggregator;
use assembler::Assembler;
use cache::CacheScopes;
use config::Config;
use directory::{BrandDirectory, InMemoryBrands};
use error::Result;
use organizations::{InMemoryOrganizations, OrganizationStore};
use sources::DataSource;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub assembler: Arc<Assembler>,
    pub organizations: Arc<dyn OrganizationStore>,
}

impl AppState {
    /// Wires the production adapters and the in-memory stores described by
    /// the configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let caches = Arc::new(CacheScopes::new(config.cache_ttl, config.cache_max_entries));

        let brands: Arc<dyn BrandDirectory> = match &config.brands_file {
            Some(path) => Arc::new(InMemoryBrands::from_file(path)?),
            None => Arc::new(InMemoryBrands::default()),
        };
        let organizations: Arc<dyn OrganizationStore> = match &config.organizations_file {
            Some(path) => Arc::new(InMemoryOrganizations::from_file(path)?),
            None => Arc::new(InMemoryOrganizations::default()),
        };
        let sources = sources::build_sources(&config, caches.clone());

        Ok(Self::with_parts(config, caches, brands, organizations, sources))
    }

    /// Assembles state from explicit collaborators.
    pub fn with_parts(
        config: Config,
        caches: Arc<CacheScopes>,
        brands: Arc<dyn BrandDirectory>,
        organizations: Arc<dyn OrganizationStore>,
        sources: Vec<Arc<dyn DataSource>>,
    ) -> Self {
        let aggregator = Arc::new(Aggregator::new(sources, config.upstream_timeout));
        let assembler = Arc::new(Assembler::new(
            brands,
            aggregator,
            caches,
            config.default_range_days,
            config.credentials.meta_access_token.is_some(),
        ));

        Self {
            config: Arc::new(config),
            assembler,
            organizations,
        }
    }
}
