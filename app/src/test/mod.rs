//! Guarded with `#[cfg(test)]` from `lib.rs`

use anyhow::Result;
use env_logger;
use maplit::btreemap;

use infra::documents::HasMeta;
use infra::ids::Id;
use infra::memory::MemoryConnectionManager;
use infra::persistence::Storage;

use crate::catalog::models::*;
use crate::catalog::*;
use crate::error::{catalog_error, CatalogError};
use crate::integrity::LineInput;
use crate::services::{Commandable, Queryable};
use crate::Costbook;

type MemoryCatalog = Catalog<MemoryConnectionManager>;

fn catalog() -> Result<(Costbook<MemoryConnectionManager>, MemoryCatalog)> {
    env_logger::try_init().unwrap_or_default();
    let cb = Costbook::in_memory()?;
    cb.setup()?;
    let catalog = cb.catalog();
    Ok((cb, catalog))
}

fn product(catalog: &MemoryCatalog, name: &str, price: f64, weight: f64) -> Result<Id<Product>> {
    catalog.execute(AddProduct(ProductDetails::new(
        name,
        "Dry goods",
        "Wholesale",
        Package::priced(price, weight, "g"),
    )))
}

fn preparation(
    catalog: &MemoryCatalog,
    name: &str,
    lines: Vec<LineInput>,
) -> Result<Id<Composite>> {
    catalog.execute(CreatePreparation(
        PreparationDetails::new(name, Yield::of(1.0, "kg")).with_lines(lines),
    ))
}

fn refusal(err: &anyhow::Error) -> CatalogError {
    catalog_error(err)
        .cloned()
        .unwrap_or_else(|| panic!("Expected a catalog error, got {:?}", err))
}

fn lines_of(
    cb: &Costbook<MemoryConnectionManager>,
    id: Id<Composite>,
) -> Result<Vec<(IngredientSource, f64)>> {
    let docs = cb.db.get()?;
    let mut lines = docs
        .find_by::<IngredientLine>(&["parent"], &id.to_string())?
        .into_iter()
        .map(|l| (l.source, l.quantity))
        .collect::<Vec<_>>();
    lines.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(lines)
}

#[test]
fn dish_price_follows_product_price_changes() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let flour = product(&catalog, "Flour", 2.0, 1000.0)?;
    let bread = catalog.execute(CreateDish(
        DishDetails::new("Bread", "Bakery", Markup::percentage(50.0))
            .with_lines(vec![LineInput::product(flour, 500.0)]),
    ))?;

    let price = catalog.query(PriceDish(bread))?;
    assert!((price.cost_price - 1.0).abs() < 1e-9, "{:?}", price);
    assert!((price.selling_price - 1.5).abs() < 1e-9, "{:?}", price);

    catalog.execute(UpdateProduct {
        id: flour,
        details: ProductDetails::new(
            "Flour",
            "Dry goods",
            "Wholesale",
            Package::priced(4.0, 1000.0, "g"),
        ),
    })?;
    let price = catalog.query(PriceDish(bread))?;
    assert!((price.cost_price - 2.0).abs() < 1e-9, "{:?}", price);
    Ok(())
}

#[test]
fn categories_and_suppliers_are_created_once() -> Result<()> {
    let (cb, catalog) = catalog()?;
    product(&catalog, "Flour", 2.0, 1000.0)?;
    product(&catalog, "Sugar", 1.0, 1000.0)?;

    let docs = cb.db.get()?;
    assert_eq!(docs.load_all::<Category>()?.len(), 1);
    assert_eq!(docs.load_all::<Supplier>()?.len(), 1);
    Ok(())
}

#[test]
fn product_names_are_unique() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    product(&catalog, "Flour", 2.0, 1000.0)?;
    let err = product(&catalog, "Flour", 3.0, 1000.0).expect_err("duplicate");
    match refusal(&err) {
        CatalogError::StructuralViolation(_) => {}
        other => panic!("Expected a violation, got {:?}", other),
    }
    Ok(())
}

#[test]
fn composite_names_are_unique_across_kinds() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    preparation(&catalog, "Stock", vec![])?;
    let err = catalog
        .execute(CreateDish(DishDetails::new(
            "Stock",
            "Soups",
            Markup::default(),
        )))
        .expect_err("duplicate");
    match refusal(&err) {
        CatalogError::StructuralViolation(_) => {}
        other => panic!("Expected a violation, got {:?}", other),
    }
    Ok(())
}

#[test]
fn closing_a_loop_is_refused_and_leaves_lines_alone() -> Result<()> {
    let (cb, catalog) = catalog()?;
    let salt = product(&catalog, "Salt", 1.0, 1000.0)?;
    let b = preparation(&catalog, "B", vec![LineInput::product(salt, 5.0)])?;
    let a = preparation(&catalog, "A", vec![LineInput::preparation(b, 1.0)])?;
    let before = lines_of(&cb, b)?;

    let err = catalog
        .execute(ReplaceIngredientLines {
            composite: b,
            lines: vec![LineInput::product(salt, 2.0), LineInput::preparation(a, 1.0)],
        })
        .expect_err("cycle");
    assert_eq!(
        refusal(&err),
        CatalogError::CycleDetected {
            composite: "B".into(),
            via: "A".into()
        }
    );
    assert_eq!(lines_of(&cb, b)?, before);
    assert_eq!(before, vec![(IngredientSource::Product(salt), 5.0)]);
    Ok(())
}

#[test]
fn self_reference_is_refused() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let a = preparation(&catalog, "A", vec![])?;
    let err = catalog
        .execute(ReplaceIngredientLines {
            composite: a,
            lines: vec![LineInput::preparation(a, 1.0)],
        })
        .expect_err("self reference");
    match refusal(&err) {
        CatalogError::CycleDetected { .. } => {}
        other => panic!("Expected a cycle, got {:?}", other),
    }
    Ok(())
}

#[test]
fn check_cycle_answers_without_writing() -> Result<()> {
    let (cb, catalog) = catalog()?;
    let b = preparation(&catalog, "B", vec![])?;
    let a = preparation(&catalog, "A", vec![LineInput::preparation(b, 1.0)])?;

    catalog.query(CheckCycle {
        composite: a,
        source: b,
    })?;
    let err = catalog
        .query(CheckCycle {
            composite: b,
            source: a,
        })
        .expect_err("cycle");
    match refusal(&err) {
        CatalogError::CycleDetected { .. } => {}
        other => panic!("Expected a cycle, got {:?}", other),
    }
    assert!(lines_of(&cb, b)?.is_empty());
    Ok(())
}

#[test]
fn bad_line_fails_the_whole_replacement() -> Result<()> {
    let (cb, catalog) = catalog()?;
    let salt = product(&catalog, "Salt", 1.0, 1000.0)?;
    let b = preparation(&catalog, "B", vec![LineInput::product(salt, 5.0)])?;
    let before = lines_of(&cb, b)?;

    let both = LineInput {
        product: Some(salt),
        preparation: Some(b),
        quantity: 1.0,
    };
    let inputs = vec![
        vec![LineInput::product(salt, 1.0), both],
        vec![LineInput::product(salt, 1.0), LineInput::product(salt, 0.0)],
        vec![LineInput::product(Id::default(), 1.0)],
    ];
    for lines in inputs {
        let res = catalog.execute(ReplaceIngredientLines { composite: b, lines });
        assert!(res.is_err());
        assert_eq!(lines_of(&cb, b)?, before);
    }
    Ok(())
}

#[test]
fn dishes_cannot_be_ingredients() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let soup = catalog.execute(CreateDish(DishDetails::new(
        "Soup",
        "Soups",
        Markup::default(),
    )))?;
    let err = preparation(&catalog, "Croutons", vec![LineInput::preparation(soup, 1.0)])
        .expect_err("dish as ingredient");
    match refusal(&err) {
        CatalogError::StructuralViolation(_) => {}
        other => panic!("Expected a violation, got {:?}", other),
    }
    Ok(())
}

#[test]
fn failed_create_leaves_nothing_behind() -> Result<()> {
    let (cb, catalog) = catalog()?;
    catalog
        .execute(CreatePreparation(
            PreparationDetails::new("Sauce", Yield::of(1.0, "L"))
                .in_category("Sauces")
                .with_lines(vec![LineInput::product(Id::default(), 1.0)]),
        ))
        .expect_err("missing product");
    let docs = cb.db.get()?;
    assert!(docs.load_all::<Composite>()?.is_empty());
    assert!(docs.load_all::<PreparationCategory>()?.is_empty());
    Ok(())
}

#[test]
fn used_records_cannot_be_deleted() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let salt = product(&catalog, "Salt", 1.0, 1000.0)?;
    let brine = preparation(&catalog, "Brine", vec![LineInput::product(salt, 30.0)])?;
    let pickles = catalog.execute(CreateDish(
        DishDetails::new("Pickles", "Sides", Markup::multiplier(3.0)).with_lines(vec![
            LineInput::preparation(brine, 0.2),
            LineInput::preparation(brine, 0.1),
        ]),
    ))?;

    let err = catalog.execute(DeleteComposite(brine)).expect_err("in use");
    assert_eq!(
        refusal(&err),
        CatalogError::ReferentialConflict {
            name: "Brine".into(),
            uses: 2
        }
    );
    let err = catalog.execute(DeleteProduct(salt)).expect_err("in use");
    assert_eq!(
        refusal(&err),
        CatalogError::ReferentialConflict {
            name: "Salt".into(),
            uses: 1
        }
    );

    catalog.execute(DeleteComposite(pickles))?;
    catalog.execute(DeleteComposite(brine))?;
    catalog.execute(DeleteProduct(salt))?;
    Ok(())
}

#[test]
fn deleting_a_composite_takes_its_lines() -> Result<()> {
    let (cb, catalog) = catalog()?;
    let salt = product(&catalog, "Salt", 1.0, 1000.0)?;
    let brine = preparation(&catalog, "Brine", vec![LineInput::product(salt, 30.0)])?;

    catalog.execute(DeleteComposite(brine))?;
    assert!(lines_of(&cb, brine)?.is_empty());
    let err = catalog.query(ShowComposite(brine)).expect_err("gone");
    assert_eq!(refusal(&err), CatalogError::not_found(&brine));
    Ok(())
}

#[test]
fn a_dish_stays_a_dish() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let soup = catalog.execute(CreateDish(DishDetails::new(
        "Soup",
        "Soups",
        Markup::default(),
    )))?;
    let err = catalog
        .execute(UpdatePreparation {
            id: soup,
            details: PreparationDetails::new("Soup", Yield::of(1.0, "L")),
        })
        .expect_err("kind change");
    match refusal(&err) {
        CatalogError::StructuralViolation(_) => {}
        other => panic!("Expected a violation, got {:?}", other),
    }
    Ok(())
}

#[test]
fn show_composite_prices_each_line() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let bones = product(&catalog, "Bones", 10.0, 1000.0)?;
    let stock = catalog.execute(CreatePreparation(
        PreparationDetails::new("Stock", Yield::of(2.0, "L"))
            .in_category("Bases")
            .with_lines(vec![LineInput::product(bones, 1000.0)]),
    ))?;

    let sheet = catalog.query(ShowComposite(stock))?;
    assert_eq!(sheet.category.as_deref(), Some("Bases"));
    assert_eq!(sheet.lines.len(), 1);
    let line = &sheet.lines[0];
    assert_eq!(line.source_name, "Bones");
    assert_eq!(line.unit, "g");
    assert!((line.unit_cost - 0.01).abs() < 1e-9);
    assert!((line.cost - 10.0).abs() < 1e-9);
    assert!((sheet.total_ingredient_cost - 10.0).abs() < 1e-9);
    assert!((sheet.cost - 5.0).abs() < 1e-9);
    assert_eq!(sheet.selling_price, 0.0);
    Ok(())
}

#[test]
fn preparations_price_at_cost_and_sell_for_nothing() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let salt = product(&catalog, "Salt", 1.0, 1000.0)?;
    let brine = preparation(&catalog, "Brine", vec![LineInput::product(salt, 500.0)])?;
    let price = catalog.query(PriceDish(brine))?;
    assert!((price.cost_price - 0.5).abs() < 1e-9);
    assert_eq!(price.selling_price, 0.0);
    Ok(())
}

#[test]
fn product_listing_filters_and_sorts() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    catalog.execute(AddProduct(ProductDetails::new(
        "Milk",
        "Dairy",
        "Farm",
        Package::priced(1.0, 1.0, "L"),
    )))?;
    product(&catalog, "Sugar", 1.0, 1000.0)?;
    product(&catalog, "Flour", 2.0, 1000.0)?;

    let names = |listings: Vec<ProductListing>| {
        listings
            .into_iter()
            .map(|l| l.product.name)
            .collect::<Vec<_>>()
    };
    assert_eq!(
        names(catalog.query(ListProducts::default())?),
        vec!["Flour", "Milk", "Sugar"]
    );
    assert_eq!(
        names(catalog.query(ListProducts {
            category: Some("Dry goods".into()),
            search: None,
        })?),
        vec!["Flour", "Sugar"]
    );
    assert_eq!(
        names(catalog.query(ListProducts {
            category: None,
            search: Some("FARM".into()),
        })?),
        vec!["Milk"]
    );
    Ok(())
}

#[test]
fn overview_uses_saved_category_order() -> Result<()> {
    let (cb, catalog) = catalog()?;
    for (name, category) in &[("Tart", "Desserts"), ("Stew", "Mains"), ("Salad", "Starters")] {
        catalog.execute(CreateDish(DishDetails::new(name, category, Markup::default())))?;
    }
    preparation(&catalog, "Stock", vec![])?;
    catalog.execute(SaveCategoryOrder {
        scope: OrderScope::Dishes,
        names: vec!["Starters".into(), "Mains".into(), "Brunch".into()],
    })?;

    let overview = catalog.query(ShowOverview)?;
    let dish_sections = overview
        .dishes
        .iter()
        .map(|s| {
            (
                s.category.clone().unwrap_or_default(),
                s.items.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
            )
        })
        .collect::<std::collections::BTreeMap<_, _>>();
    assert_eq!(
        dish_sections,
        btreemap! {
            "Desserts".to_string() => vec!["Tart".to_string()],
            "Mains".to_string() => vec!["Stew".to_string()],
            "Starters".to_string() => vec!["Salad".to_string()],
        }
    );
    let order = overview
        .dishes
        .iter()
        .map(|s| s.category.clone().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["Starters", "Mains", "Desserts"]);

    assert_eq!(overview.preparations.len(), 1);
    assert_eq!(overview.preparations[0].category, None);

    let docs = cb.db.get()?;
    assert_eq!(docs.load_all::<ordering::CategoryOrder>()?.len(), 1);
    Ok(())
}

#[test]
fn reading_twice_gives_the_same_figures() -> Result<()> {
    let (_cb, catalog) = catalog()?;
    let flour = product(&catalog, "Flour", 2.0, 1000.0)?;
    let dough = preparation(&catalog, "Dough", vec![LineInput::product(flour, 600.0)])?;
    let pizza = catalog.execute(CreateDish(
        DishDetails::new("Pizza", "Mains", Markup::multiplier(4.0))
            .with_lines(vec![LineInput::preparation(dough, 0.25)]),
    ))?;

    let first = catalog.query(PriceDish(pizza))?;
    let second = catalog.query(PriceDish(pizza))?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn stored_markup_kind_survives_unknown_values() -> Result<()> {
    let (cb, catalog) = catalog()?;
    let flour = product(&catalog, "Flour", 2.0, 1000.0)?;
    let bread = catalog.execute(CreateDish(
        DishDetails::new(
            "Bread",
            "Bakery",
            Markup {
                kind: MarkupKind::Unknown,
                value: Some(10.0),
            },
        )
        .with_lines(vec![LineInput::product(flour, 500.0)]),
    ))?;

    let price = catalog.query(PriceDish(bread))?;
    assert_eq!(price.cost_price, price.selling_price);

    let docs = cb.db.get()?;
    let stored = docs.load::<Composite>(&bread)?.expect("bread");
    assert_eq!(stored.meta().id, bread);
    Ok(())
}
