use std::path::Path;

use anyhow::{Context, Result};

use pantry_core::db::Database;
use pantry_core::shopping_list::{FontSource, ShoppingList};

use super::helpers::resolve_user;

/// Render a user's shopping list to `out` without going through the server.
pub(crate) fn cmd_cart_export(
    db: &Database,
    user_ref: &str,
    out: &Path,
    font: &FontSource,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user_ref)?;
    let list = ShoppingList::for_user(db, user.id, font)?;
    std::fs::write(out, &list.pdf)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "user_id": user.id,
                "path": out.display().to_string(),
                "pages": list.pages,
                "bytes": list.pdf.len(),
                "items": list.items,
            })
        );
    } else {
        println!(
            "Wrote {} ({} items, {} page(s)) for {}",
            out.display(),
            list.items.len(),
            list.pages,
            user.username
        );
        for (i, item) in list.items.iter().enumerate() {
            println!("  {}", item.row_text(i + 1));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_core::models::{IngredientAmountInput, Membership, NewIngredient, NewTag, NewUser, RecipeInput};

    #[test]
    fn test_cart_export_writes_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("list.pdf");
        let db = Database::open_in_memory().unwrap();
        let (user, _) = db
            .create_user(&NewUser {
                username: "anna".to_string(),
                email: "anna@example.com".to_string(),
                first_name: "Anna".to_string(),
                last_name: "K".to_string(),
                is_admin: false,
            })
            .unwrap();
        let (tag, _) = db
            .get_or_create_tag(&NewTag {
                name: "Baking".to_string(),
                color: "#AA00FF".to_string(),
                slug: "baking".to_string(),
            })
            .unwrap();
        let (flour, _) = db
            .get_or_create_ingredient(&NewIngredient {
                name: "Flour".to_string(),
                measurement_unit: "g".to_string(),
            })
            .unwrap();
        let recipe = db
            .create_recipe(
                user.id,
                &RecipeInput {
                    name: "Bread".to_string(),
                    image: None,
                    text: "Bake.".to_string(),
                    cooking_time: 60,
                    tags: vec![tag.id],
                    ingredients: vec![IngredientAmountInput {
                        id: flour.id,
                        amount: 500,
                    }],
                },
            )
            .unwrap();
        db.add_to(Membership::ShoppingCart, user.id, recipe.id).unwrap();

        cmd_cart_export(&db, "anna", &out, &FontSource::Bundled, true).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_cart_export_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let out = dir.path().join("list.pdf");
        assert!(cmd_cart_export(&db, "ghost", &out, &FontSource::Bundled, false).is_err());
        assert!(!out.exists());
    }
}
