mod commands;
mod config;
mod logging;
mod server;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{
    RecipeListArgs, UserArgs, cmd_cart_export, cmd_ingredient_search, cmd_recipe_list,
    cmd_recipe_show, cmd_seed, cmd_tag_list, cmd_user_create, cmd_user_list, cmd_user_token,
};
use crate::config::Config;
use pantry_core::db::Database;
use pantry_core::models::DEFAULT_PAGE_SIZE;
use pantry_core::seed::{INGREDIENTS_FILE, TAGS_FILE};
use pantry_core::shopping_list::{FontSource, SHOPPING_LIST_FILENAME};

#[derive(Parser)]
#[command(
    name = "pantry",
    version,
    about = "Recipe-sharing backend: REST API server and admin CLI"
)]
struct Cli {
    /// Data directory holding pantry.db (default: platform data dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Default page size for paginated listings
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
        /// TrueType font for shopping-list PDFs (default: bundled DejaVu Sans)
        #[arg(long, value_name = "PATH")]
        font: Option<PathBuf>,
    },
    /// Load tags and ingredients from CSV files (safe to re-run)
    Seed {
        /// Directory holding tags.csv and ingredients.csv (default: <data-dir>/data)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Tags CSV (name,color,slug); overrides --dir
        #[arg(long, value_name = "PATH")]
        tags: Option<PathBuf>,
        /// Ingredients CSV (name,measurement_unit); overrides --dir
        #[arg(long, value_name = "PATH")]
        ingredients: Option<PathBuf>,
        /// Preview without writing
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Look up ingredients
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Browse recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Shopping cart tools
    Cart {
        #[command(subcommand)]
        command: CartCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user and print its access token
    Create {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// Allow editing and deleting any recipe
        #[arg(long)]
        admin: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List users
    List {
        #[arg(long, default_value = "1")]
        page: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Issue a new token, invalidating the old one
    Token {
        /// User id or username
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// List all tags
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Search ingredients by name prefix
    Search {
        /// Name prefix (case-insensitive); omit to list all
        prefix: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes, newest first
    List {
        /// Only recipes with this tag slug (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Only recipes by this author (id or username)
        #[arg(long)]
        author: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe id
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CartCommands {
    /// Write a user's aggregated shopping list as PDF
    Export {
        /// User id or username
        #[arg(long)]
        user: String,
        /// Output file
        #[arg(long, default_value = SHOPPING_LIST_FILENAME)]
        out: PathBuf,
        /// TrueType font (default: bundled DejaVu Sans)
        #[arg(long, value_name = "PATH")]
        font: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn font_source(path: Option<PathBuf>) -> FontSource {
    path.map_or(FontSource::Bundled, FontSource::File)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir.as_deref())?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            page_size,
            font,
        } => {
            let options = server::ServeOptions {
                port,
                bind,
                page_size,
                font: font_source(font),
            };
            server::start_server(db, options).await
        }
        Commands::Seed {
            dir,
            tags,
            ingredients,
            dry_run,
            json,
        } => {
            let dir = dir.unwrap_or_else(|| config.seed_dir());
            let tags = tags.unwrap_or_else(|| dir.join(TAGS_FILE));
            let ingredients = ingredients.unwrap_or_else(|| dir.join(INGREDIENTS_FILE));
            cmd_seed(&db, &tags, &ingredients, dry_run, json)
        }
        Commands::User { command } => match command {
            UserCommands::Create {
                username,
                email,
                first_name,
                last_name,
                admin,
                json,
            } => cmd_user_create(
                &db,
                UserArgs {
                    username,
                    email,
                    first_name,
                    last_name,
                    admin,
                },
                json,
            ),
            UserCommands::List { page, json } => cmd_user_list(&db, page, json),
            UserCommands::Token { user, json } => cmd_user_token(&db, &user, json),
        },
        Commands::Tag { command } => match command {
            TagCommands::List { json } => cmd_tag_list(&db, json),
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::Search { prefix, json } => {
                cmd_ingredient_search(&db, prefix.as_deref(), json)
            }
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::List {
                tags,
                author,
                page,
                limit,
                json,
            } => cmd_recipe_list(
                &db,
                RecipeListArgs {
                    tags,
                    author,
                    page,
                    limit,
                },
                json,
            ),
            RecipeCommands::Show { id, json } => cmd_recipe_show(&db, id, json),
        },
        Commands::Cart { command } => match command {
            CartCommands::Export {
                user,
                out,
                font,
                json,
            } => cmd_cart_export(&db, &user, &out, &font_source(font), json),
        },
    }
}
