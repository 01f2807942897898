//! Display order of categories. Only listings read this; costing never does.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::*;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};
use infra::persistence::Storage;

use super::Catalog;
use crate::error::CatalogError;
use crate::services::{Commandable, Request};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderScope {
    Dishes,
    Preparations,
    Products,
}

/// The one document holding every scope's preferred category order.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CategoryOrder {
    #[serde(flatten)]
    meta: DocMeta<CategoryOrder>,
    #[serde(default)]
    orders: BTreeMap<OrderScope, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveCategoryOrder {
    pub scope: OrderScope,
    pub names: Vec<String>,
}

impl Request for SaveCategoryOrder {
    type Resp = ();
}

impl CategoryOrder {
    fn id() -> Id<CategoryOrder> {
        Id::hashed("CategoryOrder")
    }

    pub fn load<S: Storage>(docs: &S) -> Result<Self> {
        let id = Self::id();
        let order = docs
            .load(&id)
            .context("load category order")?
            .unwrap_or_else(|| CategoryOrder {
                meta: DocMeta::new_with_id(id),
                orders: BTreeMap::new(),
            });
        Ok(order)
    }

    pub fn preference(&self, scope: OrderScope) -> &[String] {
        self.orders
            .get(&scope)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// `names` with the preferred ones first, in preference order, and the rest
/// alphabetically. Preferred names that are not in `names` are skipped.
pub fn preferred_order<I>(names: I, preference: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut rest = names.into_iter().collect::<BTreeSet<_>>();
    let mut ordered = Vec::with_capacity(rest.len());
    for name in preference {
        if rest.remove(name) {
            ordered.push(name.clone());
        }
    }
    ordered.extend(rest);
    ordered
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<SaveCategoryOrder> for Catalog<M>
{
    fn execute(&self, req: SaveCategoryOrder) -> Result<()> {
        let SaveCategoryOrder { scope, names } = req;
        let names = names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>();

        self.in_transaction(|docs| {
            let mut order = CategoryOrder::load(docs)?;
            debug!("Category order for {}: {:?}", scope, names);
            order.orders.insert(scope, names);
            docs.save(&mut order).context("save category order")?;
            Ok(())
        })
    }
}

impl fmt::Display for OrderScope {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OrderScope::Dishes => "dishes",
            OrderScope::Preparations => "preparations",
            OrderScope::Products => "products",
        };
        fmt.write_str(name)
    }
}

impl FromStr for OrderScope {
    type Err = CatalogError;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        match src {
            "dishes" => Ok(OrderScope::Dishes),
            "preparations" => Ok(OrderScope::Preparations),
            "products" => Ok(OrderScope::Products),
            other => Err(CatalogError::violation(format!(
                "unknown category scope {:?}, expected dishes, preparations or products",
                other
            ))),
        }
    }
}

impl Entity for CategoryOrder {
    const PREFIX: &'static str = "category_order";
}

impl HasMeta for CategoryOrder {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn preferred_names_come_first_in_stored_order() {
        let ordered = preferred_order(
            names(&["Soups", "Desserts", "Mains", "Starters"]),
            &names(&["Starters", "Mains"]),
        );
        assert_eq!(ordered, names(&["Starters", "Mains", "Desserts", "Soups"]));
    }

    #[test]
    fn unknown_preferences_are_ignored() {
        let ordered = preferred_order(names(&["Mains", "Bar"]), &names(&["Brunch", "Bar"]));
        assert_eq!(ordered, names(&["Bar", "Mains"]));
    }

    #[test]
    fn without_preferences_order_is_alphabetical() {
        let ordered = preferred_order(names(&["b", "c", "a", "b"]), &[]);
        assert_eq!(ordered, names(&["a", "b", "c"]));
    }

    #[test]
    fn scope_names_parse() {
        for scope in &[OrderScope::Dishes, OrderScope::Preparations, OrderScope::Products] {
            assert_eq!(scope.to_string().parse::<OrderScope>(), Ok(*scope));
        }
        assert!("drinks".parse::<OrderScope>().is_err());
    }

    #[test]
    fn scopes_are_stored_by_name() {
        let mut order = CategoryOrder {
            meta: DocMeta::new_with_id(CategoryOrder::id()),
            orders: BTreeMap::new(),
        };
        order.orders.insert(OrderScope::Products, names(&["Dairy"]));
        let json = serde_json::to_value(&order).expect("to json");
        assert_eq!(json["orders"]["products"], serde_json::json!(["Dairy"]));
    }
}
