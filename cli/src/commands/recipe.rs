use anyhow::Result;
use std::process;

use pantry_core::db::Database;
use pantry_core::models::{PageRequest, RecipeFilter};

use super::helpers::{json_error, print_recipe_table, resolve_user};

pub(crate) struct RecipeListArgs {
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub page: u32,
    pub limit: u32,
}

pub(crate) fn cmd_recipe_list(db: &Database, args: RecipeListArgs, json: bool) -> Result<()> {
    let author = match args.author.as_deref() {
        Some(a) => Some(resolve_user(db, a)?.id),
        None => None,
    };
    let filter = RecipeFilter {
        tags: args.tags,
        author,
        ..RecipeFilter::default()
    };
    let request = PageRequest::new(Some(args.page), Some(args.limit), args.limit)?;
    let page = db.list_recipes(&filter, None, request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }
    if page.results.is_empty() {
        eprintln!("No recipes found");
        process::exit(2);
    }

    print_recipe_table(&page.results);
    println!(
        "Page {} ({} recipes total){}",
        request.page,
        page.count,
        page.next
            .map(|n| format!(". Next: --page {n}"))
            .unwrap_or_default()
    );
    Ok(())
}

pub(crate) fn cmd_recipe_show(db: &Database, id: i64, json: bool) -> Result<()> {
    let detail = match db.recipe_detail(id, None) {
        Ok(d) => d,
        Err(e) => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
            }
            process::exit(2);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let name = &detail.name;
    let author = &detail.author.username;
    let minutes = detail.cooking_time;
    println!("=== {name} ===");
    println!("  By {author}  |  {minutes} min  |  {}", detail.pub_date);
    let tags: Vec<&str> = detail.tags.iter().map(|t| t.name.as_str()).collect();
    println!("  Tags: {}\n", tags.join(", "));

    println!("  INGREDIENTS:");
    for ing in &detail.ingredients {
        println!("    {}: {} {}", ing.name, ing.amount, ing.measurement_unit);
    }

    println!("\n  METHOD:");
    for line in detail.text.lines() {
        println!("    {line}");
    }

    Ok(())
}
