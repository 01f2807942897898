use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::*;
use serde::Deserialize;
use structopt::StructOpt;

use costbook::catalog::models::{Markup, MarkupKind, Package, Product, Yield};
use costbook::catalog::{
    AddProduct, CheckCycle, CreateDish, CreatePreparation, DeleteComposite, DeleteProduct,
    DishDetails, ListProducts, OrderScope, PreparationDetails, PriceDish, ProductDetails,
    ReplaceIngredientLines, SaveCategoryOrder, Section, ShowComposite, ShowOverview,
};
use costbook::integrity::LineInput;
use costbook::services::{Commandable, Queryable};
use costbook::{catalog_error, Costbook};
use infra::documents::HasMeta;
use infra::ids::Id;

#[derive(Debug, StructOpt)]
#[structopt(name = "cb", about = "Costbook CLI")]
struct Opt {
    /// Config file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    #[structopt(subcommand)]
    command: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "setup", about = "Initialize")]
    Setup,
    #[structopt(name = "add-product", about = "Add a purchasable product")]
    AddProduct {
        #[structopt(long)]
        name: String,
        #[structopt(long)]
        category: String,
        #[structopt(long)]
        supplier: String,
        /// Price of one package
        #[structopt(long)]
        price: Option<f64>,
        /// Amount in one package, in `unit`
        #[structopt(long)]
        weight: Option<f64>,
        /// Package unit, pieces when left out
        #[structopt(long)]
        unit: Option<String>,
        #[structopt(long)]
        article: Option<String>,
    },
    #[structopt(name = "delete-product", about = "Delete an unused product")]
    DeleteProduct { id: String },
    #[structopt(name = "products", about = "List products")]
    Products {
        #[structopt(long)]
        category: Option<String>,
        #[structopt(long)]
        search: Option<String>,
    },
    #[structopt(name = "add-dish", about = "Add a dish")]
    AddDish {
        #[structopt(long)]
        name: String,
        #[structopt(long)]
        category: String,
        /// percentage or multiplier
        #[structopt(long, default_value = "percentage")]
        markup_kind: String,
        #[structopt(long)]
        markup: Option<f64>,
        /// Ingredient lines as <id>:<quantity>
        lines: Vec<String>,
    },
    #[structopt(name = "add-preparation", about = "Add a preparation")]
    AddPreparation {
        #[structopt(long)]
        name: String,
        #[structopt(long)]
        category: Option<String>,
        #[structopt(long = "yield")]
        yields: f64,
        #[structopt(long)]
        unit: String,
        /// Ingredient lines as <id>:<quantity>
        lines: Vec<String>,
    },
    #[structopt(
        name = "set-lines",
        about = "Replace all ingredient lines of a dish or preparation"
    )]
    SetLines {
        id: String,
        /// Ingredient lines as <id>:<quantity>
        lines: Vec<String>,
    },
    #[structopt(name = "delete", about = "Delete a dish or an unused preparation")]
    Delete { id: String },
    #[structopt(name = "show", about = "Show a dish or preparation with its costs")]
    Show { id: String },
    #[structopt(name = "price", about = "Cost and selling price of a dish")]
    Price { id: String },
    #[structopt(name = "overview", about = "Everything, by category")]
    Overview,
    #[structopt(name = "order-categories", about = "Set the display order of categories")]
    OrderCategories {
        /// dishes, preparations or products
        scope: OrderScope,
        names: Vec<String>,
    },
    #[structopt(name = "check-cycle", about = "Would COMPOSITE using SOURCE make a loop?")]
    CheckCycle { composite: String, source: String },
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    costbook: costbook::config::Config,
    #[serde(default)]
    env_logger: costbook::config::EnvLogger,
}

fn main() {
    if let Err(err) = run() {
        match catalog_error(&err) {
            Some(refused) => eprintln!("Refused: {}", refused),
            None => eprintln!("Error: {:?}", err),
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::from_args();

    let mut config_buf = String::new();
    File::open(&opt.config)
        .with_context(|| format!("open {:?}", opt.config))?
        .read_to_string(&mut config_buf)?;
    let mut config: Config = toml::from_str(&config_buf).context("parse config")?;
    config.costbook.apply_env()?;

    config.env_logger.builder().init();
    debug!("Options: {:?}", opt);

    let cb = Costbook::new(&config.costbook)?;
    let catalog = cb.catalog();

    match opt.command {
        Commands::Setup => {
            cb.setup()?;
        }
        Commands::AddProduct {
            name,
            category,
            supplier,
            price,
            weight,
            unit,
            article,
        } => {
            let package = Package {
                weight,
                unit: unit.unwrap_or_default(),
                price,
            };
            let mut details = ProductDetails::new(&name, &category, &supplier, package);
            details.article_number = article;
            let id = catalog.execute(AddProduct(details))?;
            println!("{}", id);
        }
        Commands::DeleteProduct { id } => {
            catalog.execute(DeleteProduct(id.parse()?))?;
        }
        Commands::Products { category, search } => {
            for listing in catalog.query(ListProducts { category, search })? {
                println!(
                    "{}: {} ({}, {}) {} per {}",
                    listing.product.meta().id,
                    listing.product.name,
                    listing.category,
                    listing.supplier,
                    money(listing.unit_price),
                    listing.product.package.unit
                );
            }
        }
        Commands::AddDish {
            name,
            category,
            markup_kind,
            markup,
            lines,
        } => {
            let markup = Markup {
                kind: markup_kind_named(&markup_kind),
                value: markup,
            };
            let details =
                DishDetails::new(&name, &category, markup).with_lines(parse_lines(&lines)?);
            let id = catalog.execute(CreateDish(details))?;
            println!("{}", id);
        }
        Commands::AddPreparation {
            name,
            category,
            yields,
            unit,
            lines,
        } => {
            let mut details = PreparationDetails::new(&name, Yield::of(yields, &unit))
                .with_lines(parse_lines(&lines)?);
            details.category = category;
            let id = catalog.execute(CreatePreparation(details))?;
            println!("{}", id);
        }
        Commands::SetLines { id, lines } => {
            catalog.execute(ReplaceIngredientLines {
                composite: id.parse()?,
                lines: parse_lines(&lines)?,
            })?;
        }
        Commands::Delete { id } => {
            catalog.execute(DeleteComposite(id.parse()?))?;
        }
        Commands::Show { id } => {
            let sheet = catalog.query(ShowComposite(id.parse()?))?;
            println!(
                "{} [{}]",
                sheet.composite.name,
                sheet.category.as_deref().unwrap_or("-")
            );
            for line in sheet.lines.iter() {
                println!(
                    "  {} {} {} @ {} = {}",
                    line.line.quantity,
                    line.unit,
                    line.source_name,
                    money(line.unit_cost),
                    money(line.cost)
                );
            }
            println!("Ingredients: {}", money(sheet.total_ingredient_cost));
            if sheet.composite.is_preparation() {
                println!("Cost per unit: {}", money(sheet.cost));
            } else {
                println!("Cost price: {}", money(sheet.cost));
                println!("Selling price: {}", money(sheet.selling_price));
            }
        }
        Commands::Price { id } => {
            let price = catalog.query(PriceDish(id.parse()?))?;
            println!(
                "{} {}",
                money(price.cost_price),
                money(price.selling_price)
            );
        }
        Commands::Overview => {
            let overview = catalog.query(ShowOverview)?;
            print_sections("Dishes", &overview.dishes, |d| {
                format!(
                    "{}: {} / {}",
                    d.name,
                    money(d.cost_price),
                    money(d.selling_price)
                )
            });
            print_sections("Preparations", &overview.preparations, |p| {
                format!(
                    "{}: {} per {}",
                    p.name,
                    money(p.cost_per_unit),
                    p.yields.unit
                )
            });
            print_sections("Products", &overview.products, |p| {
                format!(
                    "{}: {} per {}",
                    p.product.name,
                    money(p.unit_price),
                    p.product.package.unit
                )
            });
        }
        Commands::OrderCategories { scope, names } => {
            catalog.execute(SaveCategoryOrder { scope, names })?;
        }
        Commands::CheckCycle { composite, source } => {
            catalog.query(CheckCycle {
                composite: composite.parse()?,
                source: source.parse()?,
            })?;
            println!("ok");
        }
    }

    Ok(())
}

fn money(amount: f64) -> String {
    format!("{:.2}", amount)
}

fn markup_kind_named(name: &str) -> MarkupKind {
    match name {
        "percentage" => MarkupKind::Percentage,
        "multiplier" => MarkupKind::Multiplier,
        other => {
            warn!("Unknown markup kind {:?}; the dish will sell at cost", other);
            MarkupKind::Unknown
        }
    }
}

/// `<id>:<quantity>`, where the id says whether it is a product or a preparation.
fn parse_line(src: &str) -> Result<LineInput> {
    let (id, quantity) = src
        .rfind(':')
        .map(|at| (&src[..at], &src[at + 1..]))
        .ok_or_else(|| anyhow!("expected <id>:<quantity>, got {:?}", src))?;
    let quantity = quantity
        .parse::<f64>()
        .with_context(|| format!("quantity in {:?}", src))?;

    if id.starts_with(&Id::<Product>::prefix()) {
        Ok(LineInput::product(id.parse()?, quantity))
    } else {
        Ok(LineInput::preparation(id.parse()?, quantity))
    }
}

fn parse_lines(lines: &[String]) -> Result<Vec<LineInput>> {
    lines.iter().map(|l| parse_line(l)).collect()
}

fn print_sections<T>(title: &str, sections: &[Section<T>], item: impl Fn(&T) -> String) {
    println!("{}", title);
    for section in sections {
        println!("  {}", section.category.as_deref().unwrap_or("(none)"));
        for it in section.items.iter() {
            println!("    {}", item(it));
        }
    }
}
