use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use pantry_core::db::Database;

use super::helpers::{json_error, truncate};

pub(crate) fn cmd_tag_list(db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TagRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Color")]
        color: String,
        #[tabled(rename = "Slug")]
        slug: String,
    }

    let tags = db.list_tags()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
        return Ok(());
    }
    if tags.is_empty() {
        eprintln!("No tags found. Load them with: pantry seed");
        return Ok(());
    }

    let rows: Vec<TagRow> = tags
        .into_iter()
        .map(|t| TagRow {
            id: t.id,
            name: t.name,
            color: t.color,
            slug: t.slug,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_ingredient_search(db: &Database, prefix: Option<&str>, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Unit")]
        unit: String,
    }

    let ingredients = db.search_ingredients(prefix)?;
    if ingredients.is_empty() {
        let message = match prefix {
            Some(p) => format!("No ingredients starting with '{p}'"),
            None => "No ingredients found".to_string(),
        };
        if json {
            println!("{}", json_error(&message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredients)?);
        return Ok(());
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 40),
            unit: i.measurement_unit.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}
