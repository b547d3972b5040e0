use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use pantry_core::db::Database;
use pantry_core::error::{DomainError, domain_error};
use pantry_core::models::{RecipeDetail, User};

/// Resolve a user given as a numeric id or a username. An all-digit value
/// that matches no id is tried as a username.
pub(crate) fn resolve_user(db: &Database, user_ref: &str) -> Result<User> {
    if let Ok(id) = user_ref.parse::<i64>() {
        match db.get_user(id) {
            Ok(user) => return Ok(user),
            Err(e) if !matches!(domain_error(&e), Some(DomainError::NotFound { .. })) => {
                return Err(e);
            }
            Err(_) => {}
        }
    }
    db.find_user_by_username(user_ref)?
        .with_context(|| format!("No user with id or name '{user_ref}'"))
}

pub(crate) fn print_recipe_table(recipes: &[RecipeDetail]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Author")]
        author: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Minutes")]
        minutes: i64,
        #[tabled(rename = "Published")]
        published: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 30),
            author: r.author.username.clone(),
            tags: truncate(
                &r.tags
                    .iter()
                    .map(|t| t.slug.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                25,
            ),
            minutes: r.cooking_time,
            published: r.pub_date.chars().take(10).collect(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..5)).with(Alignment::right()))
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

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
