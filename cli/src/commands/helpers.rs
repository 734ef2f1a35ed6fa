use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealplan_core::models::{FavoriteMeal, PlannedMeal};

pub(crate) fn print_favorites_table(meals: &[FavoriteMeal]) {
    #[derive(Tabled)]
    struct FavoriteRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Type")]
        meal_type: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "Cal/serving")]
        per_serving: String,
        #[tabled(rename = "Time")]
        time: String,
    }

    let rows: Vec<FavoriteRow> = meals
        .iter()
        .map(|m| FavoriteRow {
            id: truncate(&m.id, 14),
            title: truncate(&m.title, 35),
            meal_type: m.meal_type.clone(),
            calories: m.calories.map_or("-".into(), |c| c.to_string()),
            per_serving: match m.calories_per_serving() {
                0 => "-".into(),
                c => c.to_string(),
            },
            time: m.cooking_time.map_or("-".into(), format_minutes),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_plan_table(meals: &[PlannedMeal]) {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Type")]
        meal_type: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "Added")]
        date: String,
    }

    let rows: Vec<PlanRow> = meals
        .iter()
        .enumerate()
        .map(|(i, m)| PlanRow {
            idx: i + 1,
            id: m.id().map(|id| truncate(&id, 14)).unwrap_or_default(),
            name: truncate(m.name(), 35),
            meal_type: m.meal_type().to_string(),
            calories: m.calories().map_or("-".into(), |c| c.to_string()),
            date: m
                .date()
                .map(|d| d.chars().take(10).collect())
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// "45m", "1h", "1h 30m".
pub(crate) fn format_minutes(minutes: i64) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
