pub mod db;
pub mod hosted;
pub mod mealgen;
pub mod models;
pub mod service;
