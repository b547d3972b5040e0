use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

pub const MIN_COOKING_TIME_MINUTES: i64 = 1;
pub const MIN_INGREDIENT_AMOUNT: i64 = 1;
pub const MAX_INGREDIENT_AMOUNT: i64 = u32::MAX as i64;
pub const DEFAULT_PAGE_SIZE: u32 = 6;
pub const MAX_PAGE_SIZE: u32 = 100;

const MAX_USER_FIELD_LEN: usize = 100;
const MAX_TAG_NAME_LEN: usize = 100;
const MAX_SLUG_LEN: usize = 50;
const MAX_INGREDIENT_NAME_LEN: usize = 200;
const MAX_UNIT_LEN: usize = 50;
const MAX_RECIPE_NAME_LEN: usize = 300;

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip)]
    pub is_admin: bool,
}

/// Public representation of a user as seen by `viewer`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl UserProfile {
    #[must_use]
    pub fn from_user(user: User, is_subscribed: bool) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed,
        }
    }
}

/// An author followed by the viewer, with a preview of their recipes.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub author: UserProfile,
    pub recipes: Vec<RecipeSummary>,
    pub recipes_count: i64,
}

// --- Tags & ingredients ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTag {
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIngredient {
    pub name: String,
    pub measurement_unit: String,
}

// --- Recipes ---

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Recipe {
    pub id: i64,
    pub author_id: i64,
    pub name: String,
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: i64,
    pub pub_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngredientAmountInput {
    /// Ingredient id.
    pub id: i64,
    pub amount: i64,
}

/// Payload for creating a recipe or replacing its contents.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeInput {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: i64,
    pub tags: Vec<i64>,
    pub ingredients: Vec<IngredientAmountInput>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecipeIngredient {
    /// Ingredient id.
    pub id: i64,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

/// Full representation used by recipe list and retrieve.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub author: UserProfile,
    pub ingredients: Vec<RecipeIngredient>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: i64,
    pub pub_date: String,
}

/// Short representation returned by favorite, cart and subscription endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecipeSummary {
    pub id: i64,
    pub name: String,
    pub image: Option<String>,
    pub cooking_time: i64,
}

impl From<&Recipe> for RecipeSummary {
    fn from(recipe: &Recipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name.clone(),
            image: recipe.image.clone(),
            cooking_time: recipe.cooking_time,
        }
    }
}

/// Per-user recipe collections sharing the same add/remove semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Favorite,
    ShoppingCart,
}

impl Membership {
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Favorite => "favorites",
            Self::ShoppingCart => "shopping_cart",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Favorite => "favorites",
            Self::ShoppingCart => "the shopping cart",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecipeFilter {
    /// Tag slugs; a recipe matches when it carries any of them.
    pub tags: Vec<String>,
    pub author: Option<i64>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

// --- Pagination ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> Result<Self> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(DomainError::validation("page must be at least 1").into());
        }
        let limit = limit.unwrap_or(default_limit);
        if limit == 0 {
            return Err(DomainError::validation("limit must be at least 1").into());
        }
        Ok(Self {
            page,
            limit: limit.min(MAX_PAGE_SIZE),
        })
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(results: Vec<T>, count: i64, request: PageRequest) -> Self {
        let seen = request.offset() + i64::try_from(results.len()).unwrap_or(i64::MAX);
        Self {
            count,
            next: (seen < count).then_some(request.page + 1),
            previous: (request.page > 1).then_some(request.page - 1),
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

// --- Validation ---

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")).into());
    }
    if value.chars().count() > max {
        return Err(
            DomainError::validation(format!("{field} must be at most {max} characters")).into(),
        );
    }
    Ok(())
}

pub fn validate_new_user(user: &NewUser) -> Result<()> {
    check_len("username", &user.username, MAX_USER_FIELD_LEN)?;
    if !user
        .username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@.+-_".contains(c))
    {
        return Err(DomainError::validation(format!(
            "Invalid username '{}'. Use letters, digits and @.+-_ only",
            user.username
        ))
        .into());
    }
    check_len("email", &user.email, MAX_USER_FIELD_LEN)?;
    if !user.email.contains('@') {
        return Err(DomainError::validation(format!("Invalid email '{}'", user.email)).into());
    }
    check_len("first_name", &user.first_name, MAX_USER_FIELD_LEN)?;
    check_len("last_name", &user.last_name, MAX_USER_FIELD_LEN)?;
    Ok(())
}

pub fn validate_new_tag(tag: &NewTag) -> Result<()> {
    check_len("tag name", &tag.name, MAX_TAG_NAME_LEN)?;
    let color = tag.color.strip_prefix('#').unwrap_or("");
    if color.len() != 6 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DomainError::validation(format!(
            "Invalid tag color '{}'. Use #RRGGBB",
            tag.color
        ))
        .into());
    }
    check_len("tag slug", &tag.slug, MAX_SLUG_LEN)?;
    if !tag
        .slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(DomainError::validation(format!("Invalid tag slug '{}'", tag.slug)).into());
    }
    Ok(())
}

pub fn validate_new_ingredient(ingredient: &NewIngredient) -> Result<()> {
    check_len("ingredient name", &ingredient.name, MAX_INGREDIENT_NAME_LEN)?;
    check_len("measurement_unit", &ingredient.measurement_unit, MAX_UNIT_LEN)?;
    Ok(())
}

/// Checks recipe fields that don't need the database.
/// Tag and ingredient existence is checked at write time.
pub fn validate_recipe_input(input: &RecipeInput) -> Result<()> {
    check_len("name", &input.name, MAX_RECIPE_NAME_LEN)?;
    if input.text.trim().is_empty() {
        return Err(DomainError::validation("text must not be empty").into());
    }
    if input.cooking_time < MIN_COOKING_TIME_MINUTES {
        return Err(DomainError::validation(format!(
            "cooking_time must be at least {MIN_COOKING_TIME_MINUTES} minute"
        ))
        .into());
    }

    if input.tags.is_empty() {
        return Err(DomainError::validation("At least one tag is required").into());
    }
    let mut tags = input.tags.clone();
    tags.sort_unstable();
    tags.dedup();
    if tags.len() < input.tags.len() {
        return Err(DomainError::validation("Tags must be unique").into());
    }

    if input.ingredients.is_empty() {
        return Err(DomainError::validation("At least one ingredient is required").into());
    }
    let mut ids: Vec<i64> = input.ingredients.iter().map(|i| i.id).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() < input.ingredients.len() {
        return Err(DomainError::validation("Ingredients must be unique").into());
    }
    if let Some(bad) = input
        .ingredients
        .iter()
        .find(|i| !(MIN_INGREDIENT_AMOUNT..=MAX_INGREDIENT_AMOUNT).contains(&i.amount))
    {
        return Err(DomainError::validation(format!(
            "Amount for ingredient {} must be between {MIN_INGREDIENT_AMOUNT} and {MAX_INGREDIENT_AMOUNT}",
            bad.id
        ))
        .into());
    }
    Ok(())
}
