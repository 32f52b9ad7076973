//! CyberMart CLI - terminal front end for the storefront API
//!
//! Every command restores the persisted session first, then runs one operation and
//! prints the JSON result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cybermart_api::ApiClient;
use cybermart_core::{
    default_config_path, init_logging, open_store, ClientConfig, NewOrder, OrderStatus,
    ProductInput, RegisterRequest, ShippingAddress,
};
use cybermart_session::{HydrationOutcome, SessionManager};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "cybermart")]
#[command(about = "Command-line storefront for the CyberMart API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and remember the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Create an account and log into it
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the remembered session
    Logout,

    /// Show the current user and what it may do
    Whoami,

    /// Browse and manage products
    #[command(subcommand)]
    Products(ProductCommands),

    /// Manage the shopping cart
    #[command(subcommand)]
    Cart(CartCommands),

    /// Place and track orders
    #[command(subcommand)]
    Orders(OrderCommands),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ProductCommands {
    List,
    Get { id: String },
    /// Create a product (admin)
    Create(ProductFields),
    /// Update a product (admin)
    Update {
        id: String,
        #[command(flatten)]
        fields: ProductFields,
    },
    /// Delete a product (admin)
    Delete { id: String },
}

#[derive(Args)]
struct ProductFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    price: Option<f64>,
    #[arg(long)]
    image_url: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    stock: Option<u32>,
}

impl From<ProductFields> for ProductInput {
    fn from(fields: ProductFields) -> Self {
        Self {
            name: fields.name,
            description: fields.description,
            price: fields.price,
            image_url: fields.image_url,
            category: fields.category,
            stock: fields.stock,
        }
    }
}

#[derive(Subcommand)]
enum CartCommands {
    Show,
    Add {
        product_id: String,
        #[arg(short, long)]
        quantity: Option<u32>,
    },
    Update {
        item_id: String,
        quantity: u32,
    },
    Remove {
        item_id: String,
    },
    Clear,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Check out the current cart
    Create {
        #[arg(long)]
        street: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        postal_code: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        payment_method: Option<String>,
    },
    List,
    Get { id: String },
    Cancel { id: String },
    /// List every order (admin)
    All,
    /// Change an order's status (admin)
    SetStatus { id: String, status: OrderStatus },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Wires store, API client and session manager from one configuration
struct App {
    api: ApiClient,
    session: SessionManager,
}

impl App {
    fn new(config: &ClientConfig) -> Result<Self> {
        let store = open_store(&config.storage).context("Failed to open token storage")?;
        let api = ApiClient::from_config(config, store.clone())?;
        let session = SessionManager::new(
            Arc::new(api.clone()),
            store,
            config.storage.token_key.clone(),
        );
        Ok(Self { api, session })
    }

    /// Restore the remembered session before running a command
    async fn start(config: &ClientConfig) -> Result<Self> {
        let app = Self::new(config)?;
        match app.session.hydrate().await {
            HydrationOutcome::Invalidated => {
                eprintln!("Saved session is no longer valid; you are logged out.")
            }
            outcome => debug!(?outcome, "Session hydration finished"),
        }
        Ok(app)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = load_config(config_path.as_ref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config = logging_config.verbose();
        logging_config.level = "debug".to_string();
    }
    init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting CyberMart CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config(command) => handle_config(command, config_path, &config),
        Commands::Login { email, password } => {
            let app = App::start(&config).await?;
            let user = app.session.login(&email, &password).await?;
            println!("Logged in as {} <{}>", user.full_name(), user.email);
            Ok(())
        }
        Commands::Register {
            first_name,
            last_name,
            email,
            password,
        } => {
            let app = App::start(&config).await?;
            let request = RegisterRequest {
                first_name,
                last_name,
                email,
                password,
            };
            let user = app.session.register(&request).await?;
            println!("Registered and logged in as {}", user.email);
            Ok(())
        }
        Commands::Logout => {
            let app = App::new(&config)?;
            app.session.logout();
            println!("Logged out");
            Ok(())
        }
        Commands::Whoami => {
            let app = App::start(&config).await?;
            let state = app.session.ready().await;
            print_json(&serde_json::json!({
                "user": state.session.user,
                "authorization": state.authorization(),
            }))
        }
        Commands::Products(command) => {
            let app = App::start(&config).await?;
            handle_products(&app.api, command).await
        }
        Commands::Cart(command) => {
            let app = App::start(&config).await?;
            handle_cart(&app.api, command).await
        }
        Commands::Orders(command) => {
            let app = App::start(&config).await?;
            handle_orders(&app, command).await
        }
    }
}

fn load_config(config_path: Option<&PathBuf>) -> Result<ClientConfig> {
    let config = match config_path {
        Some(path) if path.exists() => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        _ => ClientConfig::default(),
    }
    .with_env_overrides();

    config.validate()?;
    Ok(config)
}

fn handle_config(
    command: ConfigCommands,
    config_path: Option<PathBuf>,
    config: &ClientConfig,
) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = config_path.context("No configuration directory available")?;
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            ClientConfig::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}

async fn handle_products(api: &ApiClient, command: ProductCommands) -> Result<()> {
    match command {
        ProductCommands::List => print_json(&api.list_products().await?),
        ProductCommands::Get { id } => print_json(&api.get_product(&id).await?),
        ProductCommands::Create(fields) => {
            print_json(&api.create_product(&ProductInput::from(fields)).await?)
        }
        ProductCommands::Update { id, fields } => {
            print_json(&api.update_product(&id, &ProductInput::from(fields)).await?)
        }
        ProductCommands::Delete { id } => print_json(&api.delete_product(&id).await?),
    }
}

async fn handle_cart(api: &ApiClient, command: CartCommands) -> Result<()> {
    match command {
        CartCommands::Show => print_json(&api.get_cart().await?),
        CartCommands::Add {
            product_id,
            quantity,
        } => print_json(&api.add_cart_item(&product_id, quantity).await?),
        CartCommands::Update { item_id, quantity } => {
            print_json(&api.update_cart_item(&item_id, quantity).await?)
        }
        CartCommands::Remove { item_id } => print_json(&api.remove_cart_item(&item_id).await?),
        CartCommands::Clear => print_json(&api.clear_cart().await?),
    }
}

async fn handle_orders(app: &App, command: OrderCommands) -> Result<()> {
    let api = &app.api;
    match command {
        OrderCommands::Create {
            street,
            city,
            state,
            postal_code,
            country,
            payment_method,
        } => {
            let shipping_address = match (street, city, postal_code, country) {
                (Some(street), Some(city), Some(postal_code), Some(country)) => {
                    Some(ShippingAddress {
                        street,
                        city,
                        state,
                        postal_code,
                        country,
                    })
                }
                (None, None, None, None) => None,
                _ => anyhow::bail!(
                    "--street, --city, --postal-code and --country must be given together"
                ),
            };
            let order = NewOrder {
                shipping_address,
                payment_method,
                ..Default::default()
            };
            print_json(&api.create_order(&order).await?)
        }
        OrderCommands::List => print_json(&api.list_my_orders().await?),
        OrderCommands::Get { id } => print_json(&api.get_order(&id).await?),
        OrderCommands::Cancel { id } => print_json(&api.cancel_order(&id).await?),
        OrderCommands::All => {
            if !app.session.authorization().is_admin {
                eprintln!("Warning: the current account is not an admin");
            }
            print_json(&api.list_all_orders().await?)
        }
        OrderCommands::SetStatus { id, status } => {
            print_json(&api.update_order_status(&id, status).await?)
        }
    }
}
