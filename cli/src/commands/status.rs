use anyhow::Result;

use mealplan_core::models::{DatabaseStatus, TableStatus};

use crate::client::ApiClient;

pub(crate) async fn cmd_status(client: &ApiClient, json: bool) -> Result<()> {
    let status = client.database_status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &DatabaseStatus) {
    match status.using {
        Some(kind) => println!("Backend:   {kind}"),
        None => println!("Backend:   unavailable"),
    }
    println!(
        "Hosted:    {}",
        if status.hosted.configured {
            "configured"
        } else {
            "not configured"
        }
    );
    if status.hosted.configured {
        println!("  favorite_meals  {}", describe(&status.hosted.favorite_meals));
        println!("  planned_meals   {}", describe(&status.hosted.planned_meals));
    }
    println!(
        "Local:     {}{}",
        status.local.path.as_deref().unwrap_or("in memory"),
        if status.local.exists { "" } else { " (not created)" }
    );
    if let Some(error) = &status.error {
        println!("Note:      {error}");
    }
}

fn describe(table: &TableStatus) -> String {
    let detail = table.error.as_deref().unwrap_or("");
    if table.reachable {
        "ok".into()
    } else if !table.exists {
        format!("missing {detail}").trim_end().to_string()
    } else {
        format!("unreachable {detail}").trim_end().to_string()
    }
}

pub(crate) async fn cmd_clear(client: &ApiClient, json: bool) -> Result<()> {
    let success = client.clear_all().await?;
    if json {
        println!("{}", serde_json::json!({ "success": success }));
    } else {
        println!("Cleared favorites and planned meals");
    }
    Ok(())
}
