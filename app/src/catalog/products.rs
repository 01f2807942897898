use anyhow::{Context, Result};
use log::*;

use infra::documents::HasMeta;
use infra::ids::{Id, IdGen};
use infra::persistence::Storage;

use super::models::{Category, IngredientLine, Package, Product, Supplier, DEFAULT_PACKAGE_UNIT};
use super::{ensure_unique, existing, finite, group_named, required, Catalog};
use crate::error::CatalogError;
use crate::services::{Commandable, Request};

/// Everything a product is entered with. Category and supplier are named;
/// unknown names are created.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDetails {
    pub name: String,
    pub category: String,
    pub supplier: String,
    pub package: Package,
    pub article_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddProduct(pub ProductDetails);

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateProduct {
    pub id: Id<Product>,
    pub details: ProductDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteProduct(pub Id<Product>);

impl Request for AddProduct {
    type Resp = Id<Product>;
}

impl Request for UpdateProduct {
    type Resp = ();
}

impl Request for DeleteProduct {
    type Resp = ();
}

impl ProductDetails {
    pub fn new(name: &str, category: &str, supplier: &str, package: Package) -> Self {
        ProductDetails {
            name: name.to_string(),
            category: category.to_string(),
            supplier: supplier.to_string(),
            package,
            article_number: None,
        }
    }

    /// Writes these details over `product`, resolving group names as it goes.
    fn apply_to<S: Storage>(&self, docs: &S, idgen: &IdGen, product: &mut Product) -> Result<()> {
        let name = required(&self.name, "product")?;
        ensure_unique(docs, &name, Some(product.meta().id))?;

        product.name = name;
        product.category = group_named::<Category, _>(docs, idgen, &self.category)?;
        product.supplier = group_named::<Supplier, _>(docs, idgen, &self.supplier)?;
        product.package = checked_package(&self.package)?;
        product.article_number = self
            .article_number
            .as_ref()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Ok(())
    }
}

/// Missing price and weight are fine, they just make the product free.
/// Nonsense numbers are not.
fn checked_package(package: &Package) -> Result<Package, CatalogError> {
    if let Some(price) = package.price {
        if finite(price, "package price")? < 0.0 {
            return Err(CatalogError::violation("package price cannot be negative"));
        }
    }
    if let Some(weight) = package.weight {
        finite(weight, "package weight")?;
    }
    let unit = match package.unit.trim() {
        "" => DEFAULT_PACKAGE_UNIT.to_string(),
        unit => unit.to_string(),
    };
    Ok(Package {
        unit,
        ..package.clone()
    })
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<AddProduct> for Catalog<M>
{
    fn execute(&self, req: AddProduct) -> Result<Id<Product>> {
        let AddProduct(details) = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| {
            let id = idgen.generate();
            let mut product = Product::new(
                id,
                &details.name,
                Default::default(),
                Default::default(),
                Default::default(),
            );
            details.apply_to(docs, idgen, &mut product)?;
            docs.save(&mut product).context("save product")?;
            info!("Added product {:?}: {}", product.name, id);
            Ok(id)
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<UpdateProduct> for Catalog<M>
{
    fn execute(&self, req: UpdateProduct) -> Result<()> {
        let UpdateProduct { id, details } = req;
        let idgen = &self.idgen;
        self.in_transaction(|docs| {
            let mut product = existing::<Product, _>(docs, &id)?;
            details.apply_to(docs, idgen, &mut product)?;
            docs.save(&mut product).context("save product")?;
            debug!("Updated product {}: {:?}", id, product);
            Ok(())
        })
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<DeleteProduct> for Catalog<M>
{
    fn execute(&self, req: DeleteProduct) -> Result<()> {
        let DeleteProduct(id) = req;
        self.in_transaction(|docs| {
            let product = existing::<Product, _>(docs, &id)?;
            let uses = docs
                .find_by::<IngredientLine>(&["source", "product"], &id.to_string())?
                .len();
            if uses > 0 {
                warn!("Refusing to delete {:?}, used by {} lines", product.name, uses);
                return Err(CatalogError::ReferentialConflict {
                    name: product.name,
                    uses,
                }
                .into());
            }
            docs.delete(&product).context("delete product")?;
            info!("Deleted product {:?}: {}", product.name, id);
            Ok(())
        })
    }
}
