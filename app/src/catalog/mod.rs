//! Products, dishes and preparations, and the commands and queries over them.

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;
use serde::de::DeserializeOwned;

use infra::documents::HasMeta;
use infra::ids::{Entity, Id, IdGen};
use infra::persistence::Storage;

use crate::error::CatalogError;

mod composites;
pub mod models;
pub mod ordering;
mod products;
mod queries;
pub mod snapshot;

pub use self::composites::{
    CreateDish, CreatePreparation, DeleteComposite, DishDetails, PreparationDetails,
    ReplaceIngredientLines, UpdateDish, UpdatePreparation,
};
pub use self::ordering::{OrderScope, SaveCategoryOrder};
pub use self::products::{AddProduct, DeleteProduct, ProductDetails, UpdateProduct};
pub use self::queries::{
    CheckCycle, CompositeSheet, DishPrice, DishSummary, LineSheet, ListProducts, Overview,
    PreparationSummary, PriceDish, ProductListing, Section, ShowComposite, ShowOverview,
};

use self::models::Group;

#[derive(Debug)]
pub struct Catalog<M: r2d2::ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Catalog<M> {
    pub fn new(db: Pool<M>) -> Self {
        Catalog {
            db,
            idgen: IdGen::new(),
        }
    }

    /// Runs `f` on one pooled connection as a single unit of work.
    fn in_transaction<R, F: FnOnce(&D) -> Result<R>>(&self, f: F) -> Result<R> {
        let docs = self.db.get().context("connection from pool")?;
        docs.in_transaction(f)
    }
}

impl<M: r2d2::ManageConnection> Clone for Catalog<M> {
    fn clone(&self) -> Self {
        Catalog {
            db: self.db.clone(),
            idgen: self.idgen.clone(),
        }
    }
}

/// Trims `name`, refusing an empty one.
fn required(name: &str, what: &str) -> Result<String, CatalogError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CatalogError::violation(format!("{} name is required", what)));
    }
    Ok(name.to_string())
}

/// The group called `name`, created if this is the first time it is used.
fn group_named<G: Group, S: Storage>(docs: &S, idgen: &IdGen, name: &str) -> Result<Id<G>> {
    let name = required(name, G::LABEL)?;
    if let Some(existing) = docs.find_by::<G>(&["name"], &name)?.into_iter().next() {
        return Ok(existing.meta().id);
    }

    let mut group = G::new(idgen.generate(), &name);
    docs.save(&mut group)
        .with_context(|| format!("save {} {:?}", G::LABEL, name))?;
    info!("New {} {:?}: {}", G::LABEL, name, group.meta().id);
    Ok(group.meta().id)
}

/// Fails unless no other `T` than `except` is called `name`.
fn ensure_unique<T, S>(docs: &S, name: &str, except: Option<Id<T>>) -> Result<()>
where
    T: Entity + HasMeta + DeserializeOwned,
    S: Storage,
{
    let clash = docs
        .find_by::<T>(&["name"], name)?
        .into_iter()
        .any(|other| Some(other.meta().id) != except);
    if clash {
        return Err(CatalogError::violation(format!("{:?} already exists", name)).into());
    }
    Ok(())
}

/// Loads the `T` at `id`, or fails with `NotFound`.
fn existing<T, S>(docs: &S, id: &Id<T>) -> Result<T>
where
    T: Entity + DeserializeOwned,
    S: Storage,
{
    docs.load(id)?
        .ok_or_else(|| CatalogError::not_found(id).into())
}

fn finite(value: f64, what: &str) -> Result<f64, CatalogError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CatalogError::violation(format!("{} must be a number", what)))
    }
}
