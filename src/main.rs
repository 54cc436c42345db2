use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use price_scout::config::Config;
use price_scout::extract::ExtractionClient;
use price_scout::pricing::{UnitKind, calculate_unit_price, format_unit_price, parse_decimal};
use price_scout::{ObservationDraft, ObservationEdit, PriceObservation, ProductId, compute_identity, detect_anomaly};

/// Scanned-price comparison CLI
#[derive(Parser, Debug)]
#[command(name = "price-scout")]
struct Cli {
    /// JSON config file (PRICE_SCOUT_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ProductArgs {
    #[arg(long)]
    barcode: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    store: Option<String>,
}

impl ProductArgs {
    fn identity(&self) -> ProductId {
        compute_identity(self.barcode.as_deref(), self.name.as_deref(), self.store.as_deref())
    }
}

#[derive(Args, Debug)]
struct DraftArgs {
    #[arg(long)]
    barcode: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long)]
    store: Option<String>,
    /// Listed price, e.g. "NT$89"
    #[arg(long)]
    original: Option<String>,
    /// Sale price; wins over the listed price
    #[arg(long)]
    special: Option<String>,
    #[arg(long)]
    quantity: Option<String>,
    /// g, ml or pcs
    #[arg(long, default_value = "pcs")]
    unit: String,
    #[arg(long, default_value = "")]
    discount: String,
}

impl DraftArgs {
    fn into_draft(self) -> ObservationDraft {
        ObservationDraft {
            barcode: self.barcode,
            product_name: self.name,
            store_name: self.store,
            original_price: self.original.as_deref().and_then(parse_decimal),
            special_price: self.special.as_deref().and_then(parse_decimal),
            quantity: self.quantity.as_deref().and_then(parse_decimal),
            unit_kind: UnitKind::parse(&self.unit),
            discount_note: self.discount,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record a price observation and compare it with history
    Record(DraftArgs),
    /// List observations for a product
    History(ProductArgs),
    /// Show the lowest recorded price for a product
    Best(ProductArgs),
    /// Edit a stored observation
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        store: Option<String>,
        /// Overrides the paid price and drops original/special prices
        #[arg(long)]
        price: Option<String>,
        #[arg(long)]
        original: Option<String>,
        #[arg(long)]
        special: Option<String>,
        #[arg(long)]
        clear_special: bool,
        #[arg(long)]
        quantity: Option<String>,
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        discount: Option<String>,
    },
    /// Delete one or more observations
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print the product identity for a barcode or name/store pair
    Identity(ProductArgs),
    /// Compute a normalized unit price
    UnitPrice {
        price: String,
        quantity: String,
        #[arg(default_value = "pcs")]
        unit: String,
    },
    /// Check a price against a list of historical prices
    Anomaly {
        current: f64,
        history: Vec<f64>,
    },
    /// Extract fields from a price-tag photo via the vision proxy
    Extract {
        image: PathBuf,
        #[arg(long, default_value = "image/jpeg")]
        mime: String,
        /// Record the extracted observation
        #[arg(long)]
        save: bool,
        /// Store name to use when the label does not show one
        #[arg(long)]
        store: Option<String>,
    },
}

fn print_observation(o: &PriceObservation) {
    let flag = o.review_flag.as_ref().map(|f| format!(" [review: {}]", f.reason)).unwrap_or_default();
    println!(
        "{}  {:<16} {:>8.2}  {:>8}/{:<5} {}{}",
        o.id,
        o.store_name,
        o.total_price,
        format_unit_price(o.unit_price),
        o.unit_kind.label(),
        o.discount_note,
        flag
    );
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Record(args) => {
            let book = price_scout::open(&config)?;
            let outcome = book.record(&args.into_draft(), &config.recorded_by).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::History(args) => {
            let book = price_scout::open(&config)?;
            let history = book.history(args.identity()).await?;
            if history.is_empty() {
                info!(product = %args.identity(), "no observations");
            }
            history.iter().for_each(print_observation);
        }
        Commands::Best(args) => {
            let book = price_scout::open(&config)?;
            match book.best_price(args.identity()).await? {
                Some((lowest, comparison)) => {
                    print_observation(&lowest);
                    println!("{}", comparison.message);
                }
                None => println!("no prices recorded"),
            }
        }
        Commands::Edit { id, name, store, price, original, special, clear_special, quantity, unit, discount } => {
            let book = price_scout::open(&config)?;
            let edit = ObservationEdit {
                product_name: name,
                store_name: store,
                total_price: price.as_deref().and_then(parse_decimal),
                original_price: original.as_deref().and_then(parse_decimal),
                special_price: special.as_deref().and_then(parse_decimal),
                clear_special_price: clear_special,
                quantity: quantity.as_deref().and_then(parse_decimal),
                unit_kind: unit.as_deref().map(UnitKind::parse),
                discount_note: discount,
            };
            let updated = book.edit(&id, &edit).await?;
            print_observation(&updated);
        }
        Commands::Delete { ids } => {
            let book = price_scout::open(&config)?;
            let removed = book.delete_many(&ids).await?;
            println!("deleted {removed} of {}", ids.len());
        }
        Commands::Identity(args) => {
            println!("{}", args.identity());
        }
        Commands::UnitPrice { price, quantity, unit } => {
            let Some(price) = parse_decimal(&price) else {
                bail!("price {price:?} is not a number");
            };
            let kind = UnitKind::parse(&unit);
            let unit_price = calculate_unit_price(price, parse_decimal(&quantity), kind);
            println!("{} per {}", format_unit_price(unit_price), kind.label());
        }
        Commands::Anomaly { current, history } => {
            let report = detect_anomaly(current, &history);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Extract { image, mime, save, store } => {
            let bytes = tokio::fs::read(&image).await.with_context(|| format!("failed to read {}", image.display()))?;
            let client = ExtractionClient::from_config(&config)?;
            let fields = client.extract(&bytes, &mime).await?;
            let mut draft = fields.into_draft();
            if draft.store_name.is_none() {
                draft.store_name = store;
            }
            println!("{}", serde_json::to_string_pretty(&draft)?);
            if save {
                let book = price_scout::open(&config)?;
                let outcome = book.record(&draft, &config.recorded_by).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
