//! Mercato CLI - migrations, maintenance and catalog tools.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! mercato migrate
//!
//! # Remove modifiers that are no longer configured from all carts
//! mercato prune-modifiers
//!
//! # Add a Color axis to product 12
//! mercato variations generate --product 12 --attribute color --values Black,Blue
//!
//! # Send an order's receipt again
//! mercato receipt resend --order 1001
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `MERCATO_ADMIN_EMAIL` - Shop admin address
//! - `SMTP_HOST`, `SMTP_USERNAME`, `SMTP_PASSWORD` - Needed by `receipt resend`
//! - `MERCATO_LOG_JSON` - Emit logs as JSON
//! - `RUST_LOG` - Log filter (default `mercato=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "mercato")]
#[command(author, version, about = "Mercato shop tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Delete modifiers that are no longer configured from every cart
    PruneModifiers,
    /// Manage product variations
    Variations {
        #[command(subcommand)]
        action: VariationAction,
    },
    /// Manage order receipts
    Receipt {
        #[command(subcommand)]
        action: ReceiptAction,
    },
}

#[derive(Subcommand)]
enum VariationAction {
    /// Cross a product's variations with the values of an attribute
    Generate {
        /// Product ID
        #[arg(short, long)]
        product: i32,

        /// Attribute type name, created if it does not exist
        #[arg(short, long)]
        attribute: String,

        /// Comma-separated value labels
        #[arg(short, long, value_delimiter = ',', required = true)]
        values: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ReceiptAction {
    /// Email the receipt for an order, even if it was sent before
    Resend {
        /// Order ID
        #[arg(short, long)]
        order: i32,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mercato=info"));
    if std::env::var_os("MERCATO_LOG_JSON").is_some() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::PruneModifiers => commands::maintenance::prune_modifiers().await?,
        Commands::Variations { action } => match action {
            VariationAction::Generate {
                product,
                attribute,
                values,
            } => commands::variations::generate(product, &attribute, &values).await?,
        },
        Commands::Receipt { action } => match action {
            ReceiptAction::Resend { order } => commands::orders::resend_receipt(order).await?,
        },
    }
    Ok(())
}
