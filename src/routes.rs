use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;

use crate::auth::{self, Auth, Role, TokenKind};
use crate::error::ApiError;
use crate::models::*;
use crate::oauth::{self, OauthStateStore};
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, RepoError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/{slug}")
                    .route(web::get().to(get_post))
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/logout").route(web::post().to(logout)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_session)))
            .service(web::resource("/auth/{provider}/login").route(web::get().to(oauth_login)))
            .service(web::resource("/auth/{provider}/callback").route(web::get().to(oauth_callback)))
            .service(web::resource("/admin/users/{id}/role").route(web::put().to(set_user_role)))
            .service(web::resource("/health").route(web::get().to(health))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub templates: Arc<tera::Tera>,
    pub oauth_states: OauthStateStore,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, rate_limiter: Option<RateLimiterFacade>) -> Self {
        Self {
            repo,
            templates: Arc::new(crate::pages::build_templates()),
            oauth_states: OauthStateStore::new(),
            rate_limiter,
        }
    }
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

fn jwt_internal(e: jsonwebtoken::errors::Error) -> ApiError {
    ApiError::Internal(format!("jwt: {e}"))
}

/// Repo errors in post handlers can only mean a missing post or a backend
/// failure; give the former its public message.
fn post_repo_err(e: RepoError) -> ApiError {
    match e {
        RepoError::NotFound => ApiError::NotFound("Post not found".to_string()),
        other => other.into(),
    }
}

// ---------------- posts ----------------

#[derive(Debug, serde::Deserialize)]
pub struct ListPostsQuery {
    page: Option<String>,
    limit: Option<String>,
    category: Option<String>,
    tag: Option<String>,
    author: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/posts",
    params(
        ("page" = Option<i64>, Query, description = "1-based page, default 1"),
        ("limit" = Option<i64>, Query, description = "Page size, clamped to 1..=50, default 10"),
        ("category" = Option<String>, Query, description = "Filter by category (case-insensitive)"),
        ("tag" = Option<String>, Query, description = "Filter by tag (case-insensitive)"),
        ("author" = Option<i64>, Query, description = "Filter by author id"),
    ),
    responses(
        (status = 200, description = "Page of posts without content fields", body = PostListResponse)
    )
)]
pub async fn list_posts(
    data: web::Data<AppState>,
    query: web::Query<ListPostsQuery>,
) -> Result<HttpResponse, ApiError> {
    // unparsable page/limit fall back to defaults rather than erroring
    let page = query
        .page
        .as_deref()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(1)
        .max(1);
    let limit = query
        .limit
        .as_deref()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let filter = PostFilter {
        category: query.category.as_ref().map(|c| c.trim().to_lowercase()),
        tag: query.tag.as_ref().map(|t| t.trim().to_lowercase()),
        // a non-numeric author id can match nothing
        author_id: query.author.as_ref().map(|a| a.parse().unwrap_or(-1)),
    };
    let (posts, total) = data.repo.list_posts(filter, page, limit).await?;
    let posts: Vec<PostMeta> = posts.iter().map(PostMeta::from).collect();
    Ok(HttpResponse::Ok().json(PostListResponse {
        posts,
        pagination: Pagination::new(page, limit, total),
    }))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: Option<String>,
    /// Block array straight from the editor.
    pub content: Option<serde_json::Value>,
    pub content_html: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Post created"),
        (status = 400, description = "Missing or invalid fields"),
        (status = 401, description = "Authentication required"),
        (status = 409, description = "Duplicate slug"),
    )
)]
pub async fn create_post(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_post_create(&client_ip(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let body = payload.into_inner();
    let (Some(title), Some(content), Some(content_html), Some(category)) =
        (body.title, body.content, body.content_html, body.category)
    else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };

    let title = title.trim().to_string();
    let title_chars = title.chars().count();
    if title_chars < 3 || title_chars > 200 {
        return Err(ApiError::BadRequest(
            "Title must be between 3 and 200 characters".to_string(),
        ));
    }
    if !is_block_array(&content) {
        return Err(ApiError::BadRequest(
            "Content must be valid BlockNote JSON format (array of blocks)".to_string(),
        ));
    }
    if content_html.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "contentHtml must be a non-empty string".to_string(),
        ));
    }

    let category = category.trim().to_lowercase();
    let content_text =
        serde_json::to_string(&content).map_err(|e| ApiError::Internal(e.to_string()))?;
    let content_html = content_html.trim().to_string();
    let errors = validate_post_fields(&title, &content_text, &content_html, &category);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let slug = generate_slug(&title, chrono::Utc::now().timestamp_millis());
    let new = NewPost {
        title,
        slug,
        content: content_text,
        content_html,
        category,
        tags: normalize_tags(&body.tags),
        author_id: auth.0.user_id()?,
        author_name: auth.0.name.clone(),
    };
    let post = data.repo.create_post(new).await.map_err(|e| match e {
        RepoError::Conflict => {
            ApiError::Conflict("A post with this title already exists".to_string())
        }
        other => other.into(),
    })?;
    metrics::increment_counter!("blh_posts_created_total");
    log::info!("post {} created by {}", post.slug, post.author_id);
    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "Post created successfully",
        "post": PostMeta::from(&post),
    })))
}

#[utoipa::path(
    get,
    path = "/api/posts/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Full post with parsed block content", body = PostDetail),
        (status = 404, description = "Post not found"),
    )
)]
pub async fn get_post(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    let post = data
        .repo
        .get_post_by_slug(&slug)
        .await
        .map_err(post_repo_err)?;
    let content: serde_json::Value =
        serde_json::from_str(&post.content).map_err(|_| ApiError::ContentFormat)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "post": PostDetail::from_parts(&post, content),
    })))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<serde_json::Value>,
    pub content_html: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[utoipa::path(
    put,
    path = "/api/posts/{slug}",
    request_body = UpdatePostRequest,
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post updated"),
        (status = 400, description = "Invalid fields"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found"),
    )
)]
pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    let mut body = payload.into_inner();

    let mut upd = PostUpdate::default();
    if let Some(title) = body.title {
        upd.title = Some(title.trim().to_string());
    }
    if let Some(content) = body.content {
        if !is_block_array(&content) {
            return Err(ApiError::BadRequest(
                "Content must be valid BlockNote JSON format (array of blocks)".to_string(),
            ));
        }
        let html = match body.content_html.take() {
            Some(h) if !h.trim().is_empty() => h,
            _ => {
                return Err(ApiError::BadRequest(
                    "contentHtml must be provided when updating content".to_string(),
                ))
            }
        };
        upd.content =
            Some(serde_json::to_string(&content).map_err(|e| ApiError::Internal(e.to_string()))?);
        upd.content_html = Some(html.trim().to_string());
    }
    // contentHtml without content is ignored
    if let Some(category) = body.category {
        upd.category = Some(category.trim().to_lowercase());
    }
    if let Some(tags) = body.tags {
        upd.tags = Some(normalize_tags(&tags));
    }

    let errors = validate_post_update(&upd);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let post = data
        .repo
        .update_post(&slug, auth.0.user_id()?, upd)
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::NotFound("Post not found".to_string()),
            RepoError::Forbidden => {
                ApiError::Forbidden("You can only edit your own posts".to_string())
            }
            other => other.into(),
        })?;
    metrics::increment_counter!("blh_posts_updated_total");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Post updated successfully",
        "post": PostMeta::from(&post),
    })))
}

#[utoipa::path(
    delete,
    path = "/api/posts/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post deleted"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found"),
    )
)]
pub async fn delete_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    data.repo
        .delete_post(&slug, auth.0.user_id()?)
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::NotFound("Post not found".to_string()),
            RepoError::Forbidden => {
                ApiError::Forbidden("You can only delete your own posts".to_string())
            }
            other => other.into(),
        })?;
    metrics::increment_counter!("blh_posts_deleted_total");
    log::info!("post {} deleted", slug);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Post deleted successfully",
    })))
}

// ---------------- auth ----------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, session cookies set", body = UserInfo),
        (status = 400, description = "Missing or invalid fields"),
        (status = 409, description = "Email already registered"),
    )
)]
pub async fn register(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_register(&client_ip(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let body = payload.into_inner();
    let (Some(name), Some(email), Some(password)) = (body.name, body.email, body.password) else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".to_string()));
    }
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    if password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let role = if auth::is_bootstrap_admin(&email) {
        Role::Admin
    } else {
        Role::User
    };
    let new = NewUser {
        email,
        name,
        password_hash: Some(auth::hash_password(&password)?),
        role,
        image: None,
    };
    let user = data.repo.create_user(new).await.map_err(|e| match e {
        RepoError::Conflict => {
            ApiError::Conflict("An account with this email already exists".to_string())
        }
        other => other.into(),
    })?;
    log::info!("account {} registered", user.id);
    let (access, refresh) =
        auth::session_cookies(user.id, &user.name, user.role).map_err(jwt_internal)?;
    Ok(HttpResponse::Created()
        .cookie(access)
        .cookie(refresh)
        .json(serde_json::json!({ "user": UserInfo::from(&user) })))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session cookies set", body = UserInfo),
        (status = 401, description = "Invalid email or password"),
        (status = 429, description = "Too many attempts"),
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_login(&client_ip(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let body = payload.into_inner();
    let (Some(email), Some(password)) = (body.email, body.password) else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };
    let email = email.trim().to_lowercase();
    let user = match data.repo.get_user_by_email(&email).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(ApiError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };
    // social-only accounts have no password to check
    let valid = user
        .password_hash
        .as_deref()
        .map(|h| auth::verify_password(&password, h))
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }
    metrics::increment_counter!("blh_logins_total");
    let (access, refresh) =
        auth::session_cookies(user.id, &user.name, user.role).map_err(jwt_internal)?;
    Ok(HttpResponse::Ok()
        .cookie(access)
        .cookie(refresh)
        .json(serde_json::json!({ "user": UserInfo::from(&user) })))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Session cookies cleared"))
)]
pub async fn logout() -> Result<HttpResponse, ApiError> {
    let (access, refresh) = auth::clearing_cookies();
    Ok(HttpResponse::Ok()
        .cookie(access)
        .cookie(refresh)
        .json(serde_json::json!({ "message": "Logged out" })))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current account", body = UserInfo),
        (status = 401, description = "No active session"),
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // reload instead of trusting claims so role changes apply immediately
    let user = data
        .repo
        .get_user(auth.0.user_id()?)
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::Unauthorized,
            other => other.into(),
        })?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "user": UserInfo::from(&user) })))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    responses(
        (status = 200, description = "Access cookie re-issued"),
        (status = 401, description = "Missing or invalid refresh token"),
    )
)]
pub async fn refresh_session(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let cookie = req.cookie(auth::REFRESH_COOKIE).ok_or(ApiError::Unauthorized)?;
    let claims = auth::verify_refresh(cookie.value()).ok_or(ApiError::Unauthorized)?;
    let access = auth::create_jwt(claims.user_id()?, &claims.name, claims.role, TokenKind::Access)
        .map_err(jwt_internal)?;
    Ok(HttpResponse::Ok()
        .cookie(auth::access_cookie(access))
        .json(serde_json::json!({ "message": "Session refreshed" })))
}

// ---------------- social sign-in ----------------

pub async fn oauth_login(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let provider_name = path.into_inner();
    if !oauth::is_supported(&provider_name) {
        return Err(ApiError::NotFound("Unknown provider".to_string()));
    }
    // Graceful degradation: report 503 rather than failing at startup when
    // a provider's credentials are absent.
    let Some(provider) = oauth::configured(&provider_name) else {
        let upper = provider_name.to_uppercase();
        return Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": format!("{provider_name}_oauth_not_configured"),
            "message": format!("Set {upper}_CLIENT_ID / {upper}_CLIENT_SECRET to enable {provider_name} login"),
        })));
    };
    let state = data.oauth_states.issue(&provider_name);
    Ok(HttpResponse::Found()
        .insert_header(("Location", provider.authorize_redirect(&state)))
        .finish())
}

#[derive(Debug, serde::Deserialize)]
pub struct OauthCallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn oauth_callback(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<OauthCallbackQuery>,
) -> Result<HttpResponse, ApiError> {
    let provider_name = path.into_inner();
    if !oauth::is_supported(&provider_name) {
        return Err(ApiError::NotFound("Unknown provider".to_string()));
    }
    let q = query.into_inner();
    if let Some(e) = q.error {
        // the user denied consent at the provider
        return Err(ApiError::BadRequest(format!("Provider returned error: {e}")));
    }
    let (Some(code), Some(state)) = (q.code, q.state) else {
        return Err(ApiError::BadRequest("Missing code or state".to_string()));
    };
    if !data.oauth_states.consume(&provider_name, &state) {
        return Err(ApiError::BadRequest("Invalid or expired state".to_string()));
    }
    let Some(provider) = oauth::configured(&provider_name) else {
        return Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": format!("{provider_name}_oauth_not_configured"),
        })));
    };

    let identity = provider.fetch_identity(&code).await?;
    let user = oauth::resolve_user(data.repo.as_ref(), &provider_name, identity).await?;
    metrics::increment_counter!("blh_logins_total");
    let (access, refresh) =
        auth::session_cookies(user.id, &user.name, user.role).map_err(jwt_internal)?;
    Ok(HttpResponse::Found()
        .insert_header(("Location", user.role.landing_destination()))
        .cookie(access)
        .cookie(refresh)
        .finish())
}

// ---------------- admin ----------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct SetRoleRequest {
    pub role: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/role",
    request_body = SetRoleRequest,
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "Role updated"),
        (status = 400, description = "Invalid role"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found"),
    )
)]
pub async fn set_user_role(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SetRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    crate::require_role!(auth, Role::Admin);
    let role_str = payload
        .role
        .clone()
        .ok_or_else(|| ApiError::BadRequest("Missing required fields".to_string()))?;
    let role = Role::parse(&role_str.to_lowercase())
        .ok_or_else(|| ApiError::BadRequest("Invalid role".to_string()))?;
    let user = data
        .repo
        .set_user_role(path.into_inner(), role)
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::NotFound("User not found".to_string()),
            other => other.into(),
        })?;
    log::info!("user {} role set to {}", user.id, user.role.as_str());
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Role updated successfully",
        "role": user.role,
    })))
}

// ---------------- operational ----------------

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Storage reachable"),
        (status = 500, description = "Storage unreachable"),
    )
)]
pub async fn health(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    match tokio::time::timeout(std::time::Duration::from_secs(5), data.repo.count_users()).await {
        Ok(Ok(users)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "database": "connected",
            "users": users,
        }))),
        Ok(Err(e)) => {
            log::error!("health check failed: {e}");
            Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "status": "error",
                "database": "disconnected",
            })))
        }
        Err(_) => Ok(HttpResponse::InternalServerError().json(serde_json::json!({
            "status": "error",
            "database": "timeout",
        }))),
    }
}
