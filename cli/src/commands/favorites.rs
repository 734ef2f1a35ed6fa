use std::collections::BTreeMap;
use std::process;

use anyhow::Result;

use mealplan_core::models::{
    FavoriteMeal, MealSort, filter_by_type, sort_meals, validate_favorite, validate_meal_type,
};

use super::helpers::{json_error, print_favorites_table};
use crate::client::ApiClient;

pub(crate) async fn cmd_favorites_list(
    client: &ApiClient,
    meal_type: Option<&str>,
    sort: Option<&str>,
    json: bool,
) -> Result<()> {
    let sort = sort.map(str::parse::<MealSort>).transpose()?;

    let mut meals = filter_by_type(client.favorites().await?, meal_type);
    if let Some(sort) = sort {
        sort_meals(&mut meals, sort);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
    } else if meals.is_empty() {
        eprintln!("No favorites yet. Use `mealplan favorites add` or `mealplan generate --save`.");
    } else {
        print_favorites_table(&meals);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_favorites_add(
    client: &ApiClient,
    id: &str,
    title: &str,
    meal_type: &str,
    calories: Option<i64>,
    servings: Option<i64>,
    minutes: Option<i64>,
    json: bool,
) -> Result<()> {
    let meal = FavoriteMeal {
        id: id.to_string(),
        title: title.to_string(),
        meal_type: validate_meal_type(meal_type)?,
        calories,
        servings,
        cooking_time: minutes,
        ingredients: Vec::new(),
        instructions: Vec::new(),
        nutritional_info: BTreeMap::new(),
        user_id: String::new(),
        date_added: None,
    };
    validate_favorite(&meal)?;

    let success = client.add_favorite(&meal).await?;
    if json {
        println!("{}", serde_json::json!({ "success": success, "id": meal.id }));
    } else {
        println!("Saved '{}' to favorites (id {})", meal.title, meal.id);
    }
    Ok(())
}

pub(crate) async fn cmd_favorites_remove(client: &ApiClient, id: &str, json: bool) -> Result<()> {
    if !client.is_favorite(id).await? {
        if json {
            println!("{}", json_error(&format!("Favorite {id} not found")));
        } else {
            eprintln!("Favorite {id} not found");
        }
        process::exit(2);
    }

    let success = client.remove_favorite(id).await?;
    if json {
        println!("{}", serde_json::json!({ "success": success, "id": id }));
    } else {
        println!("Removed favorite {id}");
    }
    Ok(())
}

pub(crate) async fn cmd_favorites_check(client: &ApiClient, id: &str, json: bool) -> Result<()> {
    let is_favorite = client.is_favorite(id).await?;
    if json {
        println!("{}", serde_json::json!({ "id": id, "isFavorite": is_favorite }));
    } else if is_favorite {
        println!("{id} is a favorite");
    } else {
        println!("{id} is not a favorite");
    }
    Ok(())
}
