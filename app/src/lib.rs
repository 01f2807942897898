//! Recipe costing: what dishes cost to make from what their ingredients cost
//! to buy, and what they sell for.

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;

use infra::memory::MemoryConnectionManager;
use infra::persistence::{DocumentConnectionManager, Storage};

pub mod catalog;
pub mod config;
pub mod costing;
pub mod error;
pub mod graph;
pub mod integrity;
pub mod services;

#[cfg(test)]
mod test;

pub use crate::error::{catalog_error, CatalogError};

#[derive(Debug)]
pub struct Costbook<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

impl Costbook<DocumentConnectionManager> {
    pub fn new(config: &config::Config) -> Result<Self> {
        let db = config.postgres.build()?;
        info!("Using postgres at {}", config.postgres.redacted_url());
        Ok(Costbook { db })
    }
}

impl Costbook<MemoryConnectionManager> {
    /// A costbook that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        let db = r2d2::Pool::builder()
            .max_size(2)
            .build(MemoryConnectionManager::new())
            .context("build in-memory pool")?;
        Ok(Costbook { db })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Costbook<M> {
    pub fn with_pool(db: Pool<M>) -> Self {
        Costbook { db }
    }

    pub fn setup(&self) -> Result<()> {
        debug!("Init schema");
        self.db.get()?.setup().context("Setup persistence")?;
        Ok(())
    }

    pub fn catalog(&self) -> catalog::Catalog<M> {
        catalog::Catalog::new(self.db.clone())
    }
}

impl<M: r2d2::ManageConnection> Clone for Costbook<M> {
    fn clone(&self) -> Self {
        Costbook {
            db: self.db.clone(),
        }
    }
}
