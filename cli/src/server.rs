use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use pantry_core::db::Database;
use pantry_core::error::{DomainError, domain_error};
use pantry_core::models::{
    Ingredient, Membership, NewUser, Page, PageRequest, RecipeDetail, RecipeFilter, RecipeInput,
    RecipeSummary, Subscription, Tag, User, UserProfile,
};
use pantry_core::shopping_list::{CONTENT_TYPE, FontSource, SHOPPING_LIST_FILENAME, ShoppingList};

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    page_size: u32,
    font: Arc<FontSource>,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn page(&self, page: Option<u32>, limit: Option<u32>) -> Result<PageRequest, ApiError> {
        Ok(PageRequest::new(page, limit, self.page_size)?)
    }
}

pub struct ServeOptions {
    pub port: u16,
    pub bind: String,
    pub page_size: u32,
    pub font: FontSource,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct SubscriptionsQuery {
    page: Option<u32>,
    limit: Option<u32>,
    recipes_limit: Option<u32>,
}

#[derive(Deserialize)]
struct RecipesLimitQuery {
    recipes_limit: Option<u32>,
}

#[derive(Deserialize)]
struct IngredientQuery {
    name: Option<String>,
}

#[derive(Serialize)]
struct Registration {
    #[serde(flatten)]
    user: UserProfile,
    token: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match domain_error(&err) {
            Some(e @ DomainError::NotFound { .. }) => Self::NotFound(e.to_string()),
            Some(
                e @ (DomainError::Validation(_)
                | DomainError::AlreadyExists(_)
                | DomainError::NotMember(_)),
            ) => Self::BadRequest(e.to_string()),
            Some(e @ DomainError::Forbidden(_)) => Self::Forbidden(e.to_string()),
            Some(DomainError::ResourceUnavailable(_)) | None => Self::Internal(err),
        }
    }
}

// --- Authentication ---

/// The user behind the request's bearer token, if one was sent.
#[derive(Clone, Default)]
struct Viewer(Option<User>);

impl Viewer {
    fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|u| u.id)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Viewer>().cloned().unwrap_or_default())
    }
}

/// Rejects anonymous requests with 401.
struct CurrentUser(User);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Viewer>()
            .and_then(|v| v.0.clone())
            .map(CurrentUser)
            .ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided".to_string())
            })
    }
}

// --- Middleware ---

async fn resolve_viewer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let viewer = match header_value {
        None => Viewer(None),
        Some(value) => {
            let Some(token) = value.strip_prefix("Bearer ").map(str::trim) else {
                return ApiError::Unauthorized("Expected a Bearer token".to_string())
                    .into_response();
            };
            let found = state.db().user_for_token(token);
            match found {
                Ok(Some(user)) => Viewer(Some(user)),
                Ok(None) => {
                    return ApiError::Unauthorized("Invalid token".to_string()).into_response();
                }
                Err(err) => return ApiError::from(err).into_response(),
            }
        }
    };

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_id = viewer.id();
    request.extensions_mut().insert(viewer);
    let response = next.run(request).await;
    tracing::debug!(%method, %path, ?user_id, status = response.status().as_u16(), "request");
    response
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- User handlers ---

async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let (user, token) = state.db().create_user(&req)?;
    Ok((
        StatusCode::CREATED,
        Json(Registration {
            user: UserProfile::from_user(user, false),
            token,
        }),
    ))
}

async fn list_users(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<UserProfile>>, ApiError> {
    let request = state.page(q.page, q.limit)?;
    let db = state.db();
    let page = db.list_users(request).context("failed to list users")?;
    let subscribed = page
        .results
        .iter()
        .map(|u| db.is_subscribed(viewer.id(), u.id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut flags = subscribed.into_iter();
    Ok(Json(page.map(|u| {
        UserProfile::from_user(u, flags.next().unwrap_or_default())
    })))
}

async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserProfile> {
    Json(UserProfile::from_user(user, false))
}

async fn get_user(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<i64>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state.db().user_profile(id, viewer.id())?;
    Ok(Json(profile))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<SubscriptionsQuery>,
) -> Result<Json<Page<Subscription>>, ApiError> {
    let request = state.page(q.page, q.limit)?;
    let page = state
        .db()
        .list_subscriptions(user.id, request, q.recipes_limit)?;
    Ok(Json(page))
}

async fn subscribe(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(author_id): Path<i64>,
    Query(q): Query<RecipesLimitQuery>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription = state.db().follow(user.id, author_id, q.recipes_limit)?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn unsubscribe(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(author_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db().unfollow(user.id, author_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Tag / ingredient handlers ---

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, ApiError> {
    let tags = state.db().list_tags().context("database error")?;
    Ok(Json(tags))
}

async fn get_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Tag>, ApiError> {
    Ok(Json(state.db().get_tag(id)?))
}

async fn list_ingredients(
    State(state): State<AppState>,
    Query(q): Query<IngredientQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let ingredients = state
        .db()
        .search_ingredients(q.name.as_deref())
        .context("database error")?;
    Ok(Json(ingredients))
}

async fn get_ingredient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Ingredient>, ApiError> {
    Ok(Json(state.db().get_ingredient(id)?))
}

// --- Recipe handlers ---

/// Recipe list query. `tags` may repeat, so the raw pairs are parsed by hand.
#[derive(Debug, Default)]
struct RecipeQuery {
    page: Option<u32>,
    limit: Option<u32>,
    filter: RecipeFilter,
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ApiError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ApiError::BadRequest(format!(
            "{key} must be 0 or 1, got '{value}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{key} must be a number, got '{value}'")))
}

impl RecipeQuery {
    fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, ApiError> {
        let mut query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "page" => query.page = Some(parse_number(&key, &value)?),
                "limit" => query.limit = Some(parse_number(&key, &value)?),
                "author" => query.filter.author = Some(parse_number(&key, &value)?),
                "tags" => query.filter.tags.push(value),
                "is_favorited" => query.filter.is_favorited = parse_flag(&key, &value)?,
                "is_in_shopping_cart" => {
                    query.filter.is_in_shopping_cart = parse_flag(&key, &value)?;
                }
                _ => {}
            }
        }
        Ok(query)
    }
}

async fn list_recipes(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Page<RecipeDetail>>, ApiError> {
    let query = RecipeQuery::from_pairs(pairs)?;
    let request = state.page(query.page, query.limit)?;
    let page = state
        .db()
        .list_recipes(&query.filter, viewer.id(), request)?;
    Ok(Json(page))
}

async fn create_recipe(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<RecipeInput>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    let db = state.db();
    let recipe = db.create_recipe(user.id, &req)?;
    let detail = db.recipe_detail(recipe.id, Some(user.id))?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    Ok(Json(state.db().recipe_detail(id, viewer.id())?))
}

async fn update_recipe(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<RecipeInput>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let db = state.db();
    db.update_recipe(id, &user, &req)?;
    Ok(Json(db.recipe_detail(id, Some(user.id))?))
}

async fn delete_recipe(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db().delete_recipe(id, &user)?;
    Ok(StatusCode::NO_CONTENT)
}

fn add_membership(
    state: &AppState,
    kind: Membership,
    user: &User,
    recipe_id: i64,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    let summary = state.db().add_to(kind, user.id, recipe_id)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

fn remove_membership(
    state: &AppState,
    kind: Membership,
    user: &User,
    recipe_id: i64,
) -> Result<StatusCode, ApiError> {
    state.db().remove_from(kind, user.id, recipe_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    add_membership(&state, Membership::Favorite, &user, id)
}

async fn remove_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    remove_membership(&state, Membership::Favorite, &user, id)
}

async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    add_membership(&state, Membership::ShoppingCart, &user, id)
}

async fn remove_from_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    remove_membership(&state, Membership::ShoppingCart, &user, id)
}

async fn download_shopping_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    let lines = state.db().cart_ingredient_lines(user.id)?;
    let list = ShoppingList::from_lines(user.id, &lines, &state.font)?;
    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{SHOPPING_LIST_FILENAME}\""),
            ),
        ],
        list.pdf,
    )
        .into_response())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(register_user).get(list_users))
        .route("/api/users/me", get(get_me))
        .route("/api/users/subscriptions", get(list_subscriptions))
        .route("/api/users/{id}", get(get_user))
        .route(
            "/api/users/{id}/subscribe",
            post(subscribe).delete(unsubscribe),
        )
        .route("/api/tags", get(list_tags))
        .route("/api/tags/{id}", get(get_tag))
        .route("/api/ingredients", get(list_ingredients))
        .route("/api/ingredients/{id}", get(get_ingredient))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/download_shopping_cart",
            get(download_shopping_cart),
        )
        .route(
            "/api/recipes/{id}",
            get(get_recipe).patch(update_recipe).delete(delete_recipe),
        )
        .route(
            "/api/recipes/{id}/favorite",
            post(add_favorite).delete(remove_favorite),
        )
        .route(
            "/api/recipes/{id}/shopping_cart",
            post(add_to_cart).delete(remove_from_cart),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_viewer))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(db: Database, options: ServeOptions) -> anyhow::Result<()> {
    if let FontSource::File(path) = &options.font {
        if !path.is_file() {
            tracing::warn!(
                font = %path.display(),
                "font file not found; shopping list downloads will fail"
            );
        }
    }

    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        page_size: options.page_size,
        font: Arc::new(options.font),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", options.bind, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        page_size = options.page_size,
        "listening on http://{addr}"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
