use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{
    Ingredient, Membership, NewIngredient, NewTag, NewUser, Page, PageRequest, Recipe,
    RecipeDetail, RecipeFilter, RecipeIngredient, RecipeInput, RecipeSummary, Subscription, Tag,
    User, UserProfile, validate_new_ingredient, validate_new_tag, validate_new_user,
    validate_recipe_input,
};
use crate::shopping_list::IngredientLine;

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, is_admin, created_at";
const RECIPE_COLUMNS: &str =
    "r.id, r.author_id, r.name, r.image, r.text, r.cooking_time, r.pub_date";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Runs `f` in one transaction. Everything it wrote is rolled back if it
    /// returns an error.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            tracing::debug!(from = version, to = 1, "migrating schema");
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL UNIQUE,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    is_admin INTEGER NOT NULL DEFAULT 0,
                    token_hash TEXT UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    measurement_unit TEXT NOT NULL,
                    UNIQUE (name, measurement_unit)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    image TEXT,
                    text TEXT NOT NULL,
                    cooking_time INTEGER NOT NULL CHECK (cooking_time >= 1),
                    pub_date TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_tags (
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (recipe_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS ingredient_amounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    amount INTEGER NOT NULL CHECK (amount >= 0),
                    UNIQUE (recipe_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS favorites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS shopping_cart (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS follows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, author_id),
                    CHECK (user_id != author_id)
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_pub_date ON recipes(pub_date);
                CREATE INDEX IF NOT EXISTS idx_recipes_author ON recipes(author_id);
                CREATE INDEX IF NOT EXISTS idx_ingredients_name ON ingredients(name);
                CREATE INDEX IF NOT EXISTS idx_ingredient_amounts_recipe ON ingredient_amounts(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_shopping_cart_user ON shopping_cart(user_id);
                CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorites(user_id);
                CREATE INDEX IF NOT EXISTS idx_follows_user ON follows(user_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            is_admin: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn tag_from_row(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
            slug: row.get(3)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            measurement_unit: row.get(2)?,
        })
    }

    // Expects RECIPE_COLUMNS order.
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            author_id: row.get(1)?,
            name: row.get(2)?,
            image: row.get(3)?,
            text: row.get(4)?,
            cooking_time: row.get(5)?,
            pub_date: row.get(6)?,
        })
    }

    fn exists(&self, table: &str, id: i64) -> Result<bool> {
        let found = self.conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"),
            params![id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    // --- Users ---

    /// Creates a user and returns it with a freshly issued access token.
    /// Only the token's hash is stored.
    pub fn create_user(&self, user: &NewUser) -> Result<(User, String)> {
        validate_new_user(user)?;
        if self.find_user_by_username(&user.username)?.is_some() {
            return Err(DomainError::AlreadyExists(format!(
                "Username '{}' is already taken",
                user.username
            ))
            .into());
        }
        let email_taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER(?1))",
            params![user.email],
            |row| row.get(0),
        )?;
        if email_taken {
            return Err(DomainError::AlreadyExists(format!(
                "Email '{}' is already registered",
                user.email
            ))
            .into());
        }

        let token = generate_token();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (username, email, first_name, last_name, is_admin, token_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.username,
                user.email,
                user.first_name,
                user.last_name,
                user.is_admin,
                hash_token(&token),
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(user_id = id, username = %user.username, "user created");
        Ok((self.get_user(id)?, token))
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        user.ok_or_else(|| DomainError::not_found("User", id).into())
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Resolves a bearer token to its user.
    pub fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE token_hash = ?1"),
                params![hash_token(token)],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Replaces the user's token; the previous one stops working.
    pub fn reissue_token(&self, user_id: i64) -> Result<String> {
        self.get_user(user_id)?;
        let token = generate_token();
        self.conn.execute(
            "UPDATE users SET token_hash = ?1 WHERE id = ?2",
            params![hash_token(&token), user_id],
        )?;
        Ok(token)
    }

    pub fn list_users(&self, page: PageRequest) -> Result<Page<User>> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let users = stmt
            .query_map(
                params![i64::from(page.limit), page.offset()],
                Self::user_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(users, count, page))
    }

    pub fn user_profile(&self, user_id: i64, viewer: Option<i64>) -> Result<UserProfile> {
        let user = self.get_user(user_id)?;
        let subscribed = self.is_subscribed(viewer, user_id)?;
        Ok(UserProfile::from_user(user, subscribed))
    }

    // --- Tags ---

    /// Returns the tag with `tag.slug`, creating it when missing.
    /// The boolean is true when a row was inserted.
    pub fn get_or_create_tag(&self, tag: &NewTag) -> Result<(Tag, bool)> {
        validate_new_tag(tag)?;
        if let Some(existing) = self.find_tag_by_slug(&tag.slug)? {
            return Ok((existing, false));
        }
        self.conn.execute(
            "INSERT INTO tags (name, color, slug) VALUES (?1, ?2, ?3)",
            params![tag.name, tag.color.to_uppercase(), tag.slug],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok((self.get_tag(id)?, true))
    }

    pub fn find_tag_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name, color, slug FROM tags WHERE slug = ?1",
                params![slug],
                Self::tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    pub fn get_tag(&self, id: i64) -> Result<Tag> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name, color, slug FROM tags WHERE id = ?1",
                params![id],
                Self::tag_from_row,
            )
            .optional()?;
        tag.ok_or_else(|| DomainError::not_found("Tag", id).into())
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, color, slug FROM tags ORDER BY id")?;
        let tags = stmt
            .query_map([], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    // --- Ingredients ---

    pub fn get_or_create_ingredient(&self, ingredient: &NewIngredient) -> Result<(Ingredient, bool)> {
        validate_new_ingredient(ingredient)?;
        if let Some(existing) =
            self.find_ingredient(&ingredient.name, &ingredient.measurement_unit)?
        {
            return Ok((existing, false));
        }
        self.conn.execute(
            "INSERT INTO ingredients (name, measurement_unit) VALUES (?1, ?2)",
            params![ingredient.name, ingredient.measurement_unit],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok((self.get_ingredient(id)?, true))
    }

    pub fn find_ingredient(&self, name: &str, measurement_unit: &str) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, measurement_unit FROM ingredients
                 WHERE name = ?1 AND measurement_unit = ?2",
                params![name, measurement_unit],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, measurement_unit FROM ingredients WHERE id = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .optional()?;
        ingredient.ok_or_else(|| DomainError::not_found("Ingredient", id).into())
    }

    /// Ingredients whose name starts with `prefix` (case-insensitive), by name.
    pub fn search_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>> {
        let escaped = prefix
            .unwrap_or("")
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let mut stmt = self.conn.prepare(
            "SELECT id, name, measurement_unit FROM ingredients
             WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name, measurement_unit",
        )?;
        let ingredients = stmt
            .query_map(params![pattern], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    // --- Recipes ---

    pub fn create_recipe(&self, author_id: i64, input: &RecipeInput) -> Result<Recipe> {
        validate_recipe_input(input)?;
        self.get_user(author_id)?;
        self.check_recipe_references(input)?;

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO recipes (author_id, name, image, text, cooking_time, pub_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                author_id,
                input.name,
                input.image,
                input.text,
                input.cooking_time,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        Self::write_recipe_links(&tx, id, input)?;
        tx.commit()?;

        tracing::info!(recipe_id = id, author_id, "recipe created");
        self.get_recipe(id)
    }

    /// Replaces a recipe's fields, tags and ingredients.
    /// Only the author or an admin may edit.
    pub fn update_recipe(&self, recipe_id: i64, editor: &User, input: &RecipeInput) -> Result<Recipe> {
        let recipe = self.get_recipe(recipe_id)?;
        ensure_can_edit(&recipe, editor)?;
        validate_recipe_input(input)?;
        self.check_recipe_references(input)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE recipes SET name = ?1, image = ?2, text = ?3, cooking_time = ?4 WHERE id = ?5",
            params![
                input.name,
                input.image,
                input.text,
                input.cooking_time,
                recipe_id
            ],
        )?;
        tx.execute(
            "DELETE FROM recipe_tags WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        tx.execute(
            "DELETE FROM ingredient_amounts WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        Self::write_recipe_links(&tx, recipe_id, input)?;
        tx.commit()?;

        tracing::info!(recipe_id, editor_id = editor.id, "recipe updated");
        self.get_recipe(recipe_id)
    }

    pub fn delete_recipe(&self, recipe_id: i64, editor: &User) -> Result<()> {
        let recipe = self.get_recipe(recipe_id)?;
        ensure_can_edit(&recipe, editor)?;
        self.conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![recipe_id])?;
        tracing::info!(recipe_id, editor_id = editor.id, "recipe deleted");
        Ok(())
    }

    fn check_recipe_references(&self, input: &RecipeInput) -> Result<()> {
        for tag_id in &input.tags {
            if !self.exists("tags", *tag_id)? {
                return Err(DomainError::validation(format!("Unknown tag id {tag_id}")).into());
            }
        }
        for ingredient in &input.ingredients {
            if !self.exists("ingredients", ingredient.id)? {
                return Err(DomainError::validation(format!(
                    "Unknown ingredient id {}",
                    ingredient.id
                ))
                .into());
            }
        }
        Ok(())
    }

    fn write_recipe_links(conn: &Connection, recipe_id: i64, input: &RecipeInput) -> Result<()> {
        let mut tag_stmt =
            conn.prepare("INSERT INTO recipe_tags (recipe_id, tag_id) VALUES (?1, ?2)")?;
        for tag_id in &input.tags {
            tag_stmt.execute(params![recipe_id, tag_id])?;
        }
        let mut amount_stmt = conn.prepare(
            "INSERT INTO ingredient_amounts (recipe_id, ingredient_id, amount) VALUES (?1, ?2, ?3)",
        )?;
        for ingredient in &input.ingredients {
            amount_stmt.execute(params![recipe_id, ingredient.id, ingredient.amount])?;
        }
        Ok(())
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        recipe.ok_or_else(|| DomainError::not_found("Recipe", id).into())
    }

    pub fn recipe_tags(&self, recipe_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.color, t.slug
             FROM recipe_tags rt
             JOIN tags t ON t.id = rt.tag_id
             WHERE rt.recipe_id = ?1
             ORDER BY t.id",
        )?;
        let tags = stmt
            .query_map(params![recipe_id], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.measurement_unit, ia.amount
             FROM ingredient_amounts ia
             JOIN ingredients i ON i.id = ia.ingredient_id
             WHERE ia.recipe_id = ?1
             ORDER BY ia.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    measurement_unit: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn recipe_detail(&self, recipe_id: i64, viewer: Option<i64>) -> Result<RecipeDetail> {
        let recipe = self.get_recipe(recipe_id)?;
        self.detail_for(recipe, viewer)
    }

    fn detail_for(&self, recipe: Recipe, viewer: Option<i64>) -> Result<RecipeDetail> {
        let author = self.user_profile(recipe.author_id, viewer)?;
        let tags = self.recipe_tags(recipe.id)?;
        let ingredients = self.recipe_ingredients(recipe.id)?;
        let is_favorited = self.is_member(Membership::Favorite, viewer, recipe.id)?;
        let is_in_shopping_cart = self.is_member(Membership::ShoppingCart, viewer, recipe.id)?;
        Ok(RecipeDetail {
            id: recipe.id,
            tags,
            author,
            ingredients,
            is_favorited,
            is_in_shopping_cart,
            name: recipe.name,
            image: recipe.image,
            text: recipe.text,
            cooking_time: recipe.cooking_time,
            pub_date: recipe.pub_date,
        })
    }

    /// Newest-first page of recipes matching `filter`.
    ///
    /// The favorite/cart flags only apply to a known viewer; anonymous
    /// viewers get the unfiltered listing.
    pub fn list_recipes(
        &self,
        filter: &RecipeFilter,
        viewer: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<RecipeDetail>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if !filter.tags.is_empty() {
            let placeholders = vec!["?"; filter.tags.len()].join(", ");
            clauses.push(format!(
                "r.id IN (SELECT rt.recipe_id FROM recipe_tags rt
                          JOIN tags t ON t.id = rt.tag_id
                          WHERE t.slug IN ({placeholders}))"
            ));
            args.extend(filter.tags.iter().cloned().map(Value::Text));
        }
        if let Some(author) = filter.author {
            clauses.push("r.author_id = ?".to_string());
            args.push(Value::Integer(author));
        }
        if let Some(viewer) = viewer {
            for (enabled, kind) in [
                (filter.is_favorited, Membership::Favorite),
                (filter.is_in_shopping_cart, Membership::ShoppingCart),
            ] {
                if enabled {
                    clauses.push(format!(
                        "r.id IN (SELECT recipe_id FROM {} WHERE user_id = ?)",
                        kind.table()
                    ));
                    args.push(Value::Integer(viewer));
                }
            }
        }

        let mut where_sql = String::new();
        if !clauses.is_empty() {
            let _ = write!(where_sql, "WHERE {}", clauses.join(" AND "));
        }

        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM recipes r {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        args.push(Value::Integer(i64::from(page.limit)));
        args.push(Value::Integer(page.offset()));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r {where_sql}
             ORDER BY r.pub_date DESC, r.id DESC LIMIT ? OFFSET ?"
        ))?;
        let recipes = stmt
            .query_map(params_from_iter(args.iter()), Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let details = recipes
            .into_iter()
            .map(|recipe| self.detail_for(recipe, viewer))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(details, count, page))
    }

    // --- Favorites & shopping cart ---

    pub fn add_to(&self, kind: Membership, user_id: i64, recipe_id: i64) -> Result<RecipeSummary> {
        let recipe = self.get_recipe(recipe_id)?;
        if self.is_member(kind, Some(user_id), recipe_id)? {
            return Err(DomainError::AlreadyExists(format!(
                "Recipe {recipe_id} is already in {}",
                kind.label()
            ))
            .into());
        }
        self.conn.execute(
            &format!(
                "INSERT INTO {} (user_id, recipe_id, created_at) VALUES (?1, ?2, ?3)",
                kind.table()
            ),
            params![user_id, recipe_id, Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(user_id, recipe_id, table = kind.table(), "membership added");
        Ok(RecipeSummary::from(&recipe))
    }

    pub fn remove_from(&self, kind: Membership, user_id: i64, recipe_id: i64) -> Result<()> {
        self.get_recipe(recipe_id)?;
        let rows = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE user_id = ?1 AND recipe_id = ?2",
                kind.table()
            ),
            params![user_id, recipe_id],
        )?;
        if rows == 0 {
            return Err(DomainError::NotMember(format!(
                "Recipe {recipe_id} is not in {}",
                kind.label()
            ))
            .into());
        }
        tracing::debug!(user_id, recipe_id, table = kind.table(), "membership removed");
        Ok(())
    }

    /// Anonymous viewers are never members.
    pub fn is_member(&self, kind: Membership, viewer: Option<i64>, recipe_id: i64) -> Result<bool> {
        let Some(user_id) = viewer else {
            return Ok(false);
        };
        let found = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE user_id = ?1 AND recipe_id = ?2)",
                kind.table()
            ),
            params![user_id, recipe_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Every ingredient line of every recipe in the user's cart, ordered by
    /// cart insertion and then by each recipe's ingredient order.
    pub fn cart_ingredient_lines(&self, user_id: i64) -> Result<Vec<IngredientLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT ia.recipe_id, i.name, i.measurement_unit, ia.amount
             FROM shopping_cart sc
             JOIN ingredient_amounts ia ON ia.recipe_id = sc.recipe_id
             JOIN ingredients i ON i.id = ia.ingredient_id
             WHERE sc.user_id = ?1
             ORDER BY sc.id, ia.id",
        )?;
        let lines = stmt
            .query_map(params![user_id], |row| {
                Ok(IngredientLine {
                    recipe_id: row.get(0)?,
                    name: row.get(1)?,
                    measurement_unit: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    // --- Follows ---

    pub fn follow(
        &self,
        user_id: i64,
        author_id: i64,
        recipes_limit: Option<u32>,
    ) -> Result<Subscription> {
        let author = self.get_user(author_id)?;
        if user_id == author_id {
            return Err(DomainError::validation("You cannot subscribe to yourself").into());
        }
        if self.is_subscribed(Some(user_id), author_id)? {
            return Err(DomainError::AlreadyExists(format!(
                "Already subscribed to {}",
                author.username
            ))
            .into());
        }
        self.conn.execute(
            "INSERT INTO follows (user_id, author_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, author_id, Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(user_id, author_id, "subscribed");
        self.subscription_for(author, user_id, recipes_limit)
    }

    pub fn unfollow(&self, user_id: i64, author_id: i64) -> Result<()> {
        let author = self.get_user(author_id)?;
        let rows = self.conn.execute(
            "DELETE FROM follows WHERE user_id = ?1 AND author_id = ?2",
            params![user_id, author_id],
        )?;
        if rows == 0 {
            return Err(
                DomainError::NotMember(format!("Not subscribed to {}", author.username)).into(),
            );
        }
        tracing::debug!(user_id, author_id, "unsubscribed");
        Ok(())
    }

    pub fn is_subscribed(&self, viewer: Option<i64>, author_id: i64) -> Result<bool> {
        let Some(user_id) = viewer else {
            return Ok(false);
        };
        let found = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE user_id = ?1 AND author_id = ?2)",
            params![user_id, author_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Authors `user_id` follows, in subscription order.
    pub fn list_subscriptions(
        &self,
        user_id: i64,
        page: PageRequest,
        recipes_limit: Option<u32>,
    ) -> Result<Page<Subscription>> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.is_admin, u.created_at
             FROM follows f
             JOIN users u ON u.id = f.author_id
             WHERE f.user_id = ?1
             ORDER BY f.id
             LIMIT ?2 OFFSET ?3",
        )?;
        let authors = stmt
            .query_map(
                params![user_id, i64::from(page.limit), page.offset()],
                Self::user_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        let subscriptions = authors
            .into_iter()
            .map(|author| self.subscription_for(author, user_id, recipes_limit))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(subscriptions, count, page))
    }

    fn subscription_for(
        &self,
        author: User,
        viewer_id: i64,
        recipes_limit: Option<u32>,
    ) -> Result<Subscription> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = recipes_limit.map_or(-1, i64::from);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.author_id = ?1
             ORDER BY r.pub_date DESC, r.id DESC LIMIT ?2"
        ))?;
        let recipes = stmt
            .query_map(params![author.id, limit], Self::recipe_from_row)?
            .map(|r| r.map(|recipe| RecipeSummary::from(&recipe)))
            .collect::<Result<Vec<_>, _>>()?;
        let recipes_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM recipes WHERE author_id = ?1",
            params![author.id],
            |row| row.get(0),
        )?;
        let subscribed = self.is_subscribed(Some(viewer_id), author.id)?;
        Ok(Subscription {
            author: UserProfile::from_user(author, subscribed),
            recipes,
            recipes_count,
        })
    }
}

fn ensure_can_edit(recipe: &Recipe, editor: &User) -> Result<()> {
    if recipe.author_id == editor.id || editor.is_admin {
        Ok(())
    } else {
        Err(DomainError::Forbidden(format!(
            "Only the author or an admin can modify recipe {}",
            recipe.id
        ))
        .into())
    }
}

fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn hash_token(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::domain_error;
    use crate::models::IngredientAmountInput;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            is_admin: false,
        }
    }

    fn tag(db: &Database, slug: &str) -> Tag {
        db.get_or_create_tag(&NewTag {
            name: slug.to_uppercase(),
            color: "#E26C2D".to_string(),
            slug: slug.to_string(),
        })
        .unwrap()
        .0
    }

    fn ingredient(db: &Database, name: &str, unit: &str) -> Ingredient {
        db.get_or_create_ingredient(&NewIngredient {
            name: name.to_string(),
            measurement_unit: unit.to_string(),
        })
        .unwrap()
        .0
    }

    fn recipe_input(name: &str, tags: &[i64], ingredients: &[(i64, i64)]) -> RecipeInput {
        RecipeInput {
            name: name.to_string(),
            image: None,
            text: "Cook it.".to_string(),
            cooking_time: 15,
            tags: tags.to_vec(),
            ingredients: ingredients
                .iter()
                .map(|&(id, amount)| IngredientAmountInput { id, amount })
                .collect(),
        }
    }

    fn assert_domain(err: &anyhow::Error, check: impl Fn(&DomainError) -> bool) {
        let domain = domain_error(err).unwrap_or_else(|| panic!("not a domain error: {err:#}"));
        assert!(check(domain), "unexpected domain error: {domain:?}");
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.in_transaction(|db| {
            tag(db, "kept-briefly");
            ingredient(db, "salt", "g");
            anyhow::bail!("second step failed")
        });
        assert!(result.is_err());
        assert!(db.find_tag_by_slug("kept-briefly").unwrap().is_none());
        assert!(db.find_ingredient("salt", "g").unwrap().is_none());

        let created = db.in_transaction(|db| Ok(tag(db, "kept"))).unwrap();
        assert_eq!(db.find_tag_by_slug("kept").unwrap(), Some(created));
    }

    #[test]
    fn test_migration_sets_user_version() {
        let db = Database::open_in_memory().unwrap();
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_reopen_file_database_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pantry.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_user(&new_user("anna")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.find_user_by_username("anna").unwrap().is_some());
    }

    #[test]
    fn test_create_user_and_resolve_token() {
        let db = Database::open_in_memory().unwrap();
        let (user, token) = db.create_user(&new_user("anna")).unwrap();

        assert_eq!(user.username, "anna");
        assert!(!user.is_admin);
        assert_eq!(token.len(), 32);

        let resolved = db.user_for_token(&token).unwrap().unwrap();
        assert_eq!(resolved.id, user.id);
        assert!(db.user_for_token("bogus").unwrap().is_none());
    }

    #[test]
    fn test_token_is_not_stored_in_plain_text() {
        let db = Database::open_in_memory().unwrap();
        let (user, token) = db.create_user(&new_user("anna")).unwrap();
        let stored: String = db
            .conn
            .query_row(
                "SELECT token_hash FROM users WHERE id = ?1",
                params![user.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, hash_token(&token));
    }

    #[test]
    fn test_reissue_token_invalidates_old() {
        let db = Database::open_in_memory().unwrap();
        let (user, old) = db.create_user(&new_user("anna")).unwrap();
        let new = db.reissue_token(user.id).unwrap();
        assert_ne!(old, new);
        assert!(db.user_for_token(&old).unwrap().is_none());
        assert_eq!(db.user_for_token(&new).unwrap().unwrap().id, user.id);
    }

    #[test]
    fn test_duplicate_username_and_email_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("anna")).unwrap();

        let err = db.create_user(&new_user("anna")).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::AlreadyExists(_)));

        let mut other = new_user("anna2");
        other.email = "ANNA@example.com".to_string();
        let err = db.create_user(&other).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::AlreadyExists(_)));
    }

    #[test]
    fn test_get_user_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_user(99).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::NotFound { .. }));
    }

    #[test]
    fn test_list_users_paginates() {
        let db = Database::open_in_memory().unwrap();
        for name in ["a1", "a2", "a3"] {
            db.create_user(&new_user(name)).unwrap();
        }
        let page = db.list_users(PageRequest { page: 1, limit: 2 }).unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.next, Some(2));

        let page = db.list_users(PageRequest { page: 2, limit: 2 }).unwrap();
        assert_eq!(page.results[0].username, "a3");
        assert_eq!(page.next, None);
    }

    #[test]
    fn test_get_or_create_tag_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let new = NewTag {
            name: "Breakfast".to_string(),
            color: "#e26c2d".to_string(),
            slug: "breakfast".to_string(),
        };
        let (first, created) = db.get_or_create_tag(&new).unwrap();
        assert!(created);
        assert_eq!(first.color, "#E26C2D");

        let (second, created) = db.get_or_create_tag(&new).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn test_ingredient_unique_per_unit() {
        let db = Database::open_in_memory().unwrap();
        let grams = ingredient(&db, "sugar", "g");
        let spoons = ingredient(&db, "sugar", "tbsp");
        let again = ingredient(&db, "sugar", "g");
        assert_ne!(grams.id, spoons.id);
        assert_eq!(grams.id, again.id);
    }

    #[test]
    fn test_search_ingredients_by_prefix() {
        let db = Database::open_in_memory().unwrap();
        ingredient(&db, "sugar", "g");
        ingredient(&db, "salt", "g");
        ingredient(&db, "brown sugar", "g");
        ingredient(&db, "50%_cream", "ml");

        let found = db.search_ingredients(Some("SU")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "sugar");

        let all = db.search_ingredients(None).unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["50%_cream", "brown sugar", "salt", "sugar"]);

        // Wildcards in the prefix are literal
        assert_eq!(db.search_ingredients(Some("50%")).unwrap().len(), 1);
        assert!(db.search_ingredients(Some("%")).unwrap().is_empty());
    }

    #[test]
    fn test_create_recipe_and_detail() {
        let db = Database::open_in_memory().unwrap();
        let (author, _) = db.create_user(&new_user("anna")).unwrap();
        let breakfast = tag(&db, "breakfast");
        let flour = ingredient(&db, "flour", "g");
        let egg = ingredient(&db, "egg", "pcs");

        let recipe = db
            .create_recipe(
                author.id,
                &recipe_input("Pancakes", &[breakfast.id], &[(flour.id, 200), (egg.id, 2)]),
            )
            .unwrap();
        let detail = db.recipe_detail(recipe.id, None).unwrap();

        assert_eq!(detail.name, "Pancakes");
        assert_eq!(detail.author.username, "anna");
        assert_eq!(detail.tags, vec![breakfast]);
        assert_eq!(detail.ingredients.len(), 2);
        assert_eq!(detail.ingredients[0].name, "flour");
        assert_eq!(detail.ingredients[0].amount, 200);
        assert!(!detail.is_favorited);
        assert!(!detail.is_in_shopping_cart);
    }

    #[test]
    fn test_create_recipe_unknown_references() {
        let db = Database::open_in_memory().unwrap();
        let (author, _) = db.create_user(&new_user("anna")).unwrap();
        let flour = ingredient(&db, "flour", "g");

        let err = db
            .create_recipe(author.id, &recipe_input("X", &[42], &[(flour.id, 1)]))
            .unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::Validation(m) if m.contains("tag id 42")));

        let t = tag(&db, "lunch");
        let err = db
            .create_recipe(author.id, &recipe_input("X", &[t.id], &[(77, 1)]))
            .unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::Validation(m) if m.contains("ingredient id 77")));
    }

    #[test]
    fn test_update_recipe_replaces_links() {
        let db = Database::open_in_memory().unwrap();
        let (author, _) = db.create_user(&new_user("anna")).unwrap();
        let lunch = tag(&db, "lunch");
        let dinner = tag(&db, "dinner");
        let rice = ingredient(&db, "rice", "g");
        let beans = ingredient(&db, "beans", "g");

        let recipe = db
            .create_recipe(author.id, &recipe_input("Bowl", &[lunch.id], &[(rice.id, 100)]))
            .unwrap();
        let mut input = recipe_input("Big bowl", &[dinner.id], &[(beans.id, 300)]);
        input.cooking_time = 40;
        let updated = db.update_recipe(recipe.id, &author, &input).unwrap();

        assert_eq!(updated.name, "Big bowl");
        assert_eq!(updated.cooking_time, 40);
        assert_eq!(updated.pub_date, recipe.pub_date);
        let detail = db.recipe_detail(recipe.id, None).unwrap();
        assert_eq!(detail.tags, vec![dinner]);
        assert_eq!(detail.ingredients.len(), 1);
        assert_eq!(detail.ingredients[0].name, "beans");
    }

    #[test]
    fn test_only_author_or_admin_can_edit() {
        let db = Database::open_in_memory().unwrap();
        let (author, _) = db.create_user(&new_user("anna")).unwrap();
        let (other, _) = db.create_user(&new_user("bob")).unwrap();
        let mut admin_user = new_user("root");
        admin_user.is_admin = true;
        let (admin, _) = db.create_user(&admin_user).unwrap();
        let t = tag(&db, "lunch");
        let rice = ingredient(&db, "rice", "g");
        let input = recipe_input("Bowl", &[t.id], &[(rice.id, 100)]);
        let recipe = db.create_recipe(author.id, &input).unwrap();

        let err = db.update_recipe(recipe.id, &other, &input).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::Forbidden(_)));
        let err = db.delete_recipe(recipe.id, &other).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::Forbidden(_)));

        db.update_recipe(recipe.id, &admin, &input).unwrap();
        db.delete_recipe(recipe.id, &admin).unwrap();
        let err = db.get_recipe(recipe.id).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::NotFound { .. }));
    }

    #[test]
    fn test_delete_recipe_cascades_memberships() {
        let db = Database::open_in_memory().unwrap();
        let (author, _) = db.create_user(&new_user("anna")).unwrap();
        let t = tag(&db, "lunch");
        let rice = ingredient(&db, "rice", "g");
        let recipe = db
            .create_recipe(author.id, &recipe_input("Bowl", &[t.id], &[(rice.id, 100)]))
            .unwrap();
        db.add_to(Membership::ShoppingCart, author.id, recipe.id).unwrap();
        db.add_to(Membership::Favorite, author.id, recipe.id).unwrap();

        db.delete_recipe(recipe.id, &author).unwrap();

        assert!(db.cart_ingredient_lines(author.id).unwrap().is_empty());
        let amounts: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM ingredient_amounts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(amounts, 0);
        let favorites: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM favorites", [], |row| row.get(0))
            .unwrap();
        assert_eq!(favorites, 0);
    }

    #[test]
    fn test_list_recipes_filters() {
        let db = Database::open_in_memory().unwrap();
        let (anna, _) = db.create_user(&new_user("anna")).unwrap();
        let (bob, _) = db.create_user(&new_user("bob")).unwrap();
        let breakfast = tag(&db, "breakfast");
        let dinner = tag(&db, "dinner");
        let egg = ingredient(&db, "egg", "pcs");

        let omelette = db
            .create_recipe(anna.id, &recipe_input("Omelette", &[breakfast.id], &[(egg.id, 3)]))
            .unwrap();
        let frittata = db
            .create_recipe(
                bob.id,
                &recipe_input("Frittata", &[breakfast.id, dinner.id], &[(egg.id, 6)]),
            )
            .unwrap();
        let stew = db
            .create_recipe(bob.id, &recipe_input("Stew", &[dinner.id], &[(egg.id, 1)]))
            .unwrap();

        let all = db
            .list_recipes(&RecipeFilter::default(), None, PageRequest::default())
            .unwrap();
        let ids: Vec<i64> = all.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![stew.id, frittata.id, omelette.id]);

        let by_tag = RecipeFilter {
            tags: vec!["breakfast".to_string()],
            ..RecipeFilter::default()
        };
        assert_eq!(
            db.list_recipes(&by_tag, None, PageRequest::default())
                .unwrap()
                .count,
            2
        );

        let any_tag = RecipeFilter {
            tags: vec!["breakfast".to_string(), "dinner".to_string()],
            ..RecipeFilter::default()
        };
        assert_eq!(
            db.list_recipes(&any_tag, None, PageRequest::default())
                .unwrap()
                .count,
            3
        );

        let by_author = RecipeFilter {
            author: Some(anna.id),
            ..RecipeFilter::default()
        };
        let page = db
            .list_recipes(&by_author, None, PageRequest::default())
            .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].id, omelette.id);

        db.add_to(Membership::Favorite, anna.id, stew.id).unwrap();
        db.add_to(Membership::ShoppingCart, anna.id, frittata.id).unwrap();

        let favorited = RecipeFilter {
            is_favorited: true,
            ..RecipeFilter::default()
        };
        let page = db
            .list_recipes(&favorited, Some(anna.id), PageRequest::default())
            .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].id, stew.id);
        assert!(page.results[0].is_favorited);

        let in_cart = RecipeFilter {
            is_in_shopping_cart: true,
            ..RecipeFilter::default()
        };
        let page = db
            .list_recipes(&in_cart, Some(anna.id), PageRequest::default())
            .unwrap();
        assert_eq!(page.count, 1);
        assert!(page.results[0].is_in_shopping_cart);

        // Flags are ignored for anonymous viewers
        let page = db
            .list_recipes(&favorited, None, PageRequest::default())
            .unwrap();
        assert_eq!(page.count, 3);
    }

    #[test]
    fn test_list_recipes_paginates() {
        let db = Database::open_in_memory().unwrap();
        let (anna, _) = db.create_user(&new_user("anna")).unwrap();
        let t = tag(&db, "lunch");
        let rice = ingredient(&db, "rice", "g");
        for i in 0..5 {
            db.create_recipe(anna.id, &recipe_input(&format!("R{i}"), &[t.id], &[(rice.id, 1)]))
                .unwrap();
        }
        let page = db
            .list_recipes(
                &RecipeFilter::default(),
                None,
                PageRequest { page: 3, limit: 2 },
            )
            .unwrap();
        assert_eq!(page.count, 5);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].name, "R0");
        assert_eq!(page.previous, Some(2));
        assert_eq!(page.next, None);
    }

    #[test]
    fn test_membership_failure_modes() {
        let db = Database::open_in_memory().unwrap();
        let (anna, _) = db.create_user(&new_user("anna")).unwrap();
        let t = tag(&db, "lunch");
        let rice = ingredient(&db, "rice", "g");
        let recipe = db
            .create_recipe(anna.id, &recipe_input("Bowl", &[t.id], &[(rice.id, 100)]))
            .unwrap();

        for kind in [Membership::Favorite, Membership::ShoppingCart] {
            let summary = db.add_to(kind, anna.id, recipe.id).unwrap();
            assert_eq!(summary.name, "Bowl");
            assert!(db.is_member(kind, Some(anna.id), recipe.id).unwrap());
            assert!(!db.is_member(kind, None, recipe.id).unwrap());

            let err = db.add_to(kind, anna.id, recipe.id).unwrap_err();
            assert_domain(&err, |e| matches!(e, DomainError::AlreadyExists(_)));

            db.remove_from(kind, anna.id, recipe.id).unwrap();
            let err = db.remove_from(kind, anna.id, recipe.id).unwrap_err();
            assert_domain(&err, |e| matches!(e, DomainError::NotMember(_)));

            let err = db.add_to(kind, anna.id, 999).unwrap_err();
            assert_domain(&err, |e| matches!(e, DomainError::NotFound { .. }));
            let err = db.remove_from(kind, anna.id, 999).unwrap_err();
            assert_domain(&err, |e| matches!(e, DomainError::NotFound { .. }));
        }
    }

    #[test]
    fn test_follow_rules() {
        let db = Database::open_in_memory().unwrap();
        let (anna, _) = db.create_user(&new_user("anna")).unwrap();
        let (bob, _) = db.create_user(&new_user("bob")).unwrap();

        let err = db.follow(anna.id, anna.id, None).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::Validation(_)));

        let sub = db.follow(anna.id, bob.id, None).unwrap();
        assert_eq!(sub.author.username, "bob");
        assert!(sub.author.is_subscribed);
        assert_eq!(sub.recipes_count, 0);

        let err = db.follow(anna.id, bob.id, None).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::AlreadyExists(_)));

        assert!(db.user_profile(bob.id, Some(anna.id)).unwrap().is_subscribed);
        assert!(!db.user_profile(bob.id, None).unwrap().is_subscribed);
        assert!(!db.user_profile(anna.id, Some(bob.id)).unwrap().is_subscribed);

        db.unfollow(anna.id, bob.id).unwrap();
        let err = db.unfollow(anna.id, bob.id).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::NotMember(_)));

        let err = db.follow(anna.id, 404, None).unwrap_err();
        assert_domain(&err, |e| matches!(e, DomainError::NotFound { .. }));
    }

    #[test]
    fn test_list_subscriptions_with_recipes_limit() {
        let db = Database::open_in_memory().unwrap();
        let (anna, _) = db.create_user(&new_user("anna")).unwrap();
        let (bob, _) = db.create_user(&new_user("bob")).unwrap();
        let (carl, _) = db.create_user(&new_user("carl")).unwrap();
        let t = tag(&db, "lunch");
        let rice = ingredient(&db, "rice", "g");
        for i in 0..3 {
            db.create_recipe(bob.id, &recipe_input(&format!("B{i}"), &[t.id], &[(rice.id, 1)]))
                .unwrap();
        }
        db.follow(anna.id, bob.id, None).unwrap();
        db.follow(anna.id, carl.id, None).unwrap();

        let page = db
            .list_subscriptions(anna.id, PageRequest::default(), Some(2))
            .unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.results[0].author.username, "bob");
        assert_eq!(page.results[0].recipes_count, 3);
        assert_eq!(page.results[0].recipes.len(), 2);
        assert_eq!(page.results[0].recipes[0].name, "B2");
        assert_eq!(page.results[1].author.username, "carl");

        let page = db
            .list_subscriptions(anna.id, PageRequest::default(), None)
            .unwrap();
        assert_eq!(page.results[0].recipes.len(), 3);
    }

    #[test]
    fn test_cart_ingredient_lines_order() {
        let db = Database::open_in_memory().unwrap();
        let (anna, _) = db.create_user(&new_user("anna")).unwrap();
        let (bob, _) = db.create_user(&new_user("bob")).unwrap();
        let t = tag(&db, "baking");
        let flour = ingredient(&db, "Flour", "g");
        let sugar = ingredient(&db, "Sugar", "g");
        let egg = ingredient(&db, "Egg", "pcs");

        let a = db
            .create_recipe(
                anna.id,
                &recipe_input("A", &[t.id], &[(flour.id, 200), (sugar.id, 50)]),
            )
            .unwrap();
        let b = db
            .create_recipe(
                anna.id,
                &recipe_input("B", &[t.id], &[(flour.id, 300), (egg.id, 2)]),
            )
            .unwrap();
        db.add_to(Membership::ShoppingCart, anna.id, a.id).unwrap();
        db.add_to(Membership::ShoppingCart, anna.id, b.id).unwrap();
        db.add_to(Membership::ShoppingCart, bob.id, b.id).unwrap();

        let lines = db.cart_ingredient_lines(anna.id).unwrap();
        let got: Vec<(i64, &str, u32)> = lines
            .iter()
            .map(|l| (l.recipe_id, l.name.as_str(), l.amount))
            .collect();
        assert_eq!(
            got,
            vec![
                (a.id, "Flour", 200),
                (a.id, "Sugar", 50),
                (b.id, "Flour", 300),
                (b.id, "Egg", 2),
            ]
        );

        assert_eq!(db.cart_ingredient_lines(bob.id).unwrap().len(), 2);
    }
}
