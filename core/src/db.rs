use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;

use crate::models::{FavoriteMeal, MealTable, PlannedMeal, PlannedMealsRecord, now_rfc3339};

/// Version of the on-disk layout, stored in `PRAGMA user_version`.
///
/// List and map columns (`ingredients`, `instructions`, `nutritional_info`,
/// `meals_data`) hold UTF-8 JSON text written by `serde_json`. `NULL` or empty
/// text reads back as the empty value; anything else that fails to decode is
/// an error.
pub const SCHEMA_VERSION: i64 = 1;

const FAVORITE_MEALS_DDL: &str = "CREATE TABLE IF NOT EXISTS favorite_meals (
    id TEXT NOT NULL,
    title TEXT NOT NULL,
    type TEXT NOT NULL,
    calories INTEGER,
    servings INTEGER,
    cooking_time INTEGER,
    ingredients TEXT,
    instructions TEXT,
    nutritional_info TEXT,
    user_id TEXT NOT NULL,
    date_added TEXT,
    PRIMARY KEY (id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_favorite_meals_user ON favorite_meals(user_id);";

const PLANNED_MEALS_DDL: &str = "CREATE TABLE IF NOT EXISTS planned_meals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE,
    meals_data TEXT,
    last_updated TEXT
);";

const FAVORITE_COLUMNS: &str = "id, title, type, calories, servings, cooking_time, ingredients, instructions, nutritional_info, user_id, date_added";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(FAVORITE_MEALS_DDL)?;
            self.conn.execute_batch(PLANNED_MEALS_DDL)?;
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        }

        Ok(())
    }

    /// Create `table` if it is missing. Safe to call repeatedly.
    pub fn create_table(&self, table: MealTable) -> Result<()> {
        let ddl = match table {
            MealTable::FavoriteMeals => FAVORITE_MEALS_DDL,
            MealTable::PlannedMeals => PLANNED_MEALS_DDL,
        };
        self.conn
            .execute_batch(ddl)
            .with_context(|| format!("Failed to create table {table}"))
    }

    pub fn table_exists(&self, table: MealTable) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table.name()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- Row mapping helpers ---

    fn favorite_from_row(row: &rusqlite::Row) -> rusqlite::Result<FavoriteMeal> {
        Ok(FavoriteMeal {
            id: row.get(0)?,
            title: row.get(1)?,
            meal_type: row.get(2)?,
            calories: row.get(3)?,
            servings: row.get(4)?,
            cooking_time: row.get(5)?,
            ingredients: json_column(row, 6)?,
            instructions: json_column(row, 7)?,
            nutritional_info: json_column(row, 8)?,
            user_id: row.get(9)?,
            date_added: row.get(10)?,
        })
    }

    // --- Favorites ---

    pub fn list_favorites(&self, user_id: &str) -> Result<Vec<FavoriteMeal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FAVORITE_COLUMNS} FROM favorite_meals WHERE user_id = ?1 ORDER BY rowid"
        ))?;
        let meals = stmt
            .query_map(params![user_id], Self::favorite_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meals)
    }

    /// Insert `meal` under its own `user_id`. Returns false if that id was
    /// already stored for the user; the existing row is left untouched.
    pub fn insert_favorite(&self, meal: &FavoriteMeal) -> Result<bool> {
        let rows = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO favorite_meals ({FAVORITE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                meal.id,
                meal.title,
                meal.meal_type,
                meal.calories,
                meal.servings,
                meal.cooking_time,
                serde_json::to_string(&meal.ingredients)?,
                serde_json::to_string(&meal.instructions)?,
                serde_json::to_string(&meal.nutritional_info)?,
                meal.user_id,
                meal.date_added,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_favorite(&self, id: &str, user_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM favorite_meals WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn favorite_exists(&self, id: &str, user_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM favorite_meals WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn clear_favorites(&self, user_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM favorite_meals WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(rows)
    }

    // --- Planned meals ---

    pub fn get_planned_meals(&self, user_id: &str) -> Result<Option<PlannedMealsRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT user_id, meals_data, last_updated FROM planned_meals WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(PlannedMealsRecord {
                        user_id: row.get(0)?,
                        meals: json_column(row, 1)?,
                        last_updated: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Replace the user's whole planned list, creating the row on first save.
    pub fn save_planned_meals(
        &self,
        user_id: &str,
        meals: &[PlannedMeal],
    ) -> Result<PlannedMealsRecord> {
        let now = now_rfc3339();
        let data = serde_json::to_string(meals)?;

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM planned_meals WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE planned_meals SET meals_data = ?1, last_updated = ?2 WHERE id = ?3",
                params![data, now, id],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO planned_meals (user_id, meals_data, last_updated) VALUES (?1, ?2, ?3)",
                params![user_id, data, now],
            )?;
        }

        Ok(PlannedMealsRecord {
            user_id: user_id.to_string(),
            meals: meals.to_vec(),
            last_updated: Some(now),
        })
    }

    pub fn clear_planned_meals(&self, user_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM planned_meals WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(rows)
    }
}

fn json_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: DeserializeOwned + Default,
{
    let text: Option<String> = row.get(idx)?;
    match text.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}
