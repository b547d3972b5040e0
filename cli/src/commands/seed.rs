use std::path::Path;

use anyhow::Result;

use pantry_core::db::Database;
use pantry_core::seed::load_initial_data;

pub(crate) fn cmd_seed(
    db: &Database,
    tags_path: &Path,
    ingredients_path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let summary = load_initial_data(db, tags_path, ingredients_path, dry_run)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "tags_parsed": summary.tags_parsed,
                "tags_created": summary.tags_created,
                "tags_reused": summary.tags_reused,
                "ingredients_parsed": summary.ingredients_parsed,
                "ingredients_created": summary.ingredients_created,
                "ingredients_reused": summary.ingredients_reused,
            })
        );
    } else {
        if dry_run {
            println!("Dry run, no changes made.\n");
        } else {
            println!("Seed complete.\n");
        }
        println!(
            "  Tags:        {} parsed, {} new, {} existing",
            summary.tags_parsed, summary.tags_created, summary.tags_reused
        );
        println!(
            "  Ingredients: {} parsed, {} new, {} existing",
            summary.ingredients_parsed, summary.ingredients_created, summary.ingredients_reused
        );
    }

    Ok(())
}
