use anyhow::Result;

use mealplan_core::mealgen::GeneratedMeal;
use mealplan_core::models::{ImageRequest, MealRequest};

use super::helpers::format_minutes;
use crate::client::ApiClient;

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_generate(
    client: &ApiClient,
    meal_type: &str,
    preferences: Option<String>,
    calories: Option<String>,
    time: Option<String>,
    save: bool,
    json: bool,
) -> Result<()> {
    let request = MealRequest {
        meal_type: Some(meal_type.to_string()),
        preferences,
        calorie_range: calories,
        cooking_time: time,
    };
    let meal = client.generate_meal(&request).await?;

    let saved = if save {
        Some(client.add_favorite(&meal.to_favorite()).await?)
    } else {
        None
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&meal)?);
        return Ok(());
    }

    print_meal(&meal);
    if saved.is_some() {
        println!("\nSaved to favorites (id {})", meal.id());
    }
    Ok(())
}

fn print_meal(meal: &GeneratedMeal) {
    println!("{} ({})", meal.title(), meal.meal_type());
    if let Some(description) = meal.description() {
        println!("{description}");
    }

    let mut facts = Vec::new();
    if let Some(c) = meal.calories() {
        facts.push(format!("{c} kcal per serving"));
    }
    if let Some(s) = meal.servings() {
        facts.push(format!("{s} serving(s)"));
    }
    if let Some(m) = meal.cooking_time() {
        facts.push(format_minutes(m));
    }
    if !facts.is_empty() {
        println!("{}", facts.join(" | "));
    }

    let ingredients = meal.ingredients();
    if !ingredients.is_empty() {
        println!("\nIngredients:");
        for item in &ingredients {
            println!("  - {item}");
        }
    }
    let instructions = meal.instructions();
    if !instructions.is_empty() {
        println!("\nInstructions:");
        for (i, step) in instructions.iter().enumerate() {
            println!("  {}. {step}", i + 1);
        }
    }
    let nutrition = meal.nutritional_info();
    if !nutrition.is_empty() {
        println!("\nNutrition:");
        for (name, value) in &nutrition {
            println!("  {name:<14} {value}");
        }
    }
    if let Some(url) = meal.image_url() {
        println!("\nImage: {url}");
    }
}

pub(crate) async fn cmd_image(
    client: &ApiClient,
    title: &str,
    meal_type: Option<String>,
    description: Option<String>,
    json: bool,
) -> Result<()> {
    let request = ImageRequest {
        meal_title: Some(title.to_string()),
        meal_type,
        description,
    };
    let url = client.generate_image(&request).await?;

    if json {
        println!("{}", serde_json::json!({ "imageUrl": url }));
    } else {
        println!("{url}");
    }
    Ok(())
}
