mod client;
mod commands;
mod config;
mod openai;
mod server;
mod supabase;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::client::{ApiClient, DEFAULT_SERVER};
use crate::commands::{
    cmd_clear, cmd_favorites_add, cmd_favorites_check, cmd_favorites_list, cmd_favorites_remove,
    cmd_generate, cmd_image, cmd_plan_add, cmd_plan_add_favorite, cmd_plan_clear, cmd_plan_remove,
    cmd_plan_show, cmd_status,
};
use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "mealplan",
    version,
    about = "Meal planner: favorites, planned meals, and AI meal ideas"
)]
struct Cli {
    /// Base URL of the mealplan API
    #[arg(long, global = true, env = "MEALPLAN_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value = "3000")]
        port: u16,
        /// Address to bind to (use 127.0.0.1 to keep it off the network)
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,
        /// Skip the hosted database even if it is configured
        #[arg(long)]
        local_only: bool,
    },
    /// Manage favorite meals
    Favorites {
        #[command(subcommand)]
        command: FavoritesCommands,
    },
    /// Manage the planned-meals list
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Generate a meal idea with the language model
    Generate {
        /// Meal type: breakfast, lunch, dinner, snack
        meal_type: String,
        /// Dietary preferences or restrictions
        #[arg(long)]
        preferences: Option<String>,
        /// Calories per serving (e.g. "400-600")
        #[arg(long)]
        calories: Option<String>,
        /// Cooking time in minutes (e.g. "30")
        #[arg(long)]
        time: Option<String>,
        /// Save the generated meal to favorites
        #[arg(long)]
        save: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a photo of a meal
    Image {
        /// Meal title
        title: String,
        /// Meal type
        #[arg(long = "type")]
        meal_type: Option<String>,
        /// Short description of the dish
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which database backend the server is using
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all favorites and planned meals
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FavoritesCommands {
    /// List favorite meals
    List {
        /// Only show this meal type ("All" shows everything)
        #[arg(long = "type")]
        meal_type: Option<String>,
        /// calories-low-to-high, calories-high-to-low, name-a-to-z, name-z-to-a, cooking-time
        #[arg(long)]
        sort: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a meal to favorites
    Add {
        /// Meal ID
        id: String,
        /// Meal title
        title: String,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(long = "type")]
        meal_type: String,
        /// Total calories
        #[arg(long)]
        calories: Option<i64>,
        /// Number of servings
        #[arg(long)]
        servings: Option<i64>,
        /// Cooking time in minutes
        #[arg(long)]
        time: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a meal from favorites
    Remove {
        /// Meal ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a meal is a favorite
    Check {
        /// Meal ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Show planned meals
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a meal to the plan
    Add {
        /// Meal name
        name: String,
        /// Calories
        #[arg(long)]
        calories: Option<i64>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(long = "type", default_value = "snack")]
        meal_type: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a favorite meal to the plan
    AddFavorite {
        /// Favorite meal ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a planned meal
    Remove {
        /// Planned meal ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Empty the plan
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mealplan=info,mealplan_core=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            port,
            bind,
            local_only,
        } => {
            init_tracing();
            let config = Config::load()?;
            server::start_server(&config, port, &bind, local_only).await
        }
        command => run_client(&ApiClient::new(&cli.server)?, command).await,
    }
}

async fn run_client(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::Serve { .. } => Ok(()),
        Commands::Favorites { command } => match command {
            FavoritesCommands::List {
                meal_type,
                sort,
                json,
            } => cmd_favorites_list(client, meal_type.as_deref(), sort.as_deref(), json).await,
            FavoritesCommands::Add {
                id,
                title,
                meal_type,
                calories,
                servings,
                time,
                json,
            } => {
                cmd_favorites_add(
                    client, &id, &title, &meal_type, calories, servings, time, json,
                )
                .await
            }
            FavoritesCommands::Remove { id, json } => cmd_favorites_remove(client, &id, json).await,
            FavoritesCommands::Check { id, json } => cmd_favorites_check(client, &id, json).await,
        },
        Commands::Plan { command } => match command {
            PlanCommands::Show { json } => cmd_plan_show(client, json).await,
            PlanCommands::Add {
                name,
                calories,
                meal_type,
                json,
            } => cmd_plan_add(client, &name, calories, &meal_type, json).await,
            PlanCommands::AddFavorite { id, json } => {
                cmd_plan_add_favorite(client, &id, json).await
            }
            PlanCommands::Remove { id, json } => cmd_plan_remove(client, &id, json).await,
            PlanCommands::Clear { json } => cmd_plan_clear(client, json).await,
        },
        Commands::Generate {
            meal_type,
            preferences,
            calories,
            time,
            save,
            json,
        } => cmd_generate(client, &meal_type, preferences, calories, time, save, json).await,
        Commands::Image {
            title,
            meal_type,
            description,
            json,
        } => cmd_image(client, &title, meal_type, description, json).await,
        Commands::Status { json } => cmd_status(client, json).await,
        Commands::Clear { json } => cmd_clear(client, json).await,
    }
}
