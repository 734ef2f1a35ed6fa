use std::process;

use anyhow::Result;

use mealplan_core::models::{PlannedMeal, validate_meal_type};

use super::helpers::{json_error, print_plan_table};
use crate::client::ApiClient;

fn not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) async fn cmd_plan_show(client: &ApiClient, json: bool) -> Result<()> {
    let meals = client.planned_meals().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
    } else if meals.is_empty() {
        eprintln!("Nothing planned. Use `mealplan plan add` or `mealplan plan add-favorite`.");
    } else {
        print_plan_table(&meals);
        let total: i64 = meals.iter().filter_map(PlannedMeal::calories).sum();
        println!("Total: {total} kcal");
    }
    Ok(())
}

pub(crate) async fn cmd_plan_add(
    client: &ApiClient,
    name: &str,
    calories: Option<i64>,
    meal_type: &str,
    json: bool,
) -> Result<()> {
    let meal_type = validate_meal_type(meal_type)?;
    let entry = PlannedMeal::new(name, calories, &meal_type);
    let meals = client.append_planned_meal(entry.clone()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Planned {name} ({meal_type}); {} meal(s) in plan",
            meals.len()
        );
    }
    Ok(())
}

pub(crate) async fn cmd_plan_add_favorite(client: &ApiClient, id: &str, json: bool) -> Result<()> {
    let favorites = client.favorites().await?;
    let Some(favorite) = favorites.iter().find(|m| m.id == id) else {
        not_found(&format!("Favorite {id} not found"), json);
    };

    let entry = PlannedMeal::from_favorite(favorite);
    let meals = client.append_planned_meal(entry.clone()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Planned {} from favorites; {} meal(s) in plan",
            favorite.title,
            meals.len()
        );
    }
    Ok(())
}

pub(crate) async fn cmd_plan_remove(client: &ApiClient, id: &str, json: bool) -> Result<()> {
    let mut meals = client.planned_meals().await?;
    let before = meals.len();
    meals.retain(|m| m.id().as_deref() != Some(id));
    if meals.len() == before {
        not_found(&format!("Planned meal {id} not found"), json);
    }

    client.save_planned_meals(&meals).await?;
    if json {
        println!("{}", serde_json::json!({ "removed": id, "remaining": meals.len() }));
    } else {
        println!("Removed {id}; {} meal(s) in plan", meals.len());
    }
    Ok(())
}

pub(crate) async fn cmd_plan_clear(client: &ApiClient, json: bool) -> Result<()> {
    let success = client.save_planned_meals(&[]).await?;
    if json {
        println!("{}", serde_json::json!({ "success": success }));
    } else {
        println!("Cleared planned meals");
    }
    Ok(())
}
