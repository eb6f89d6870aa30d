use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

pub const MAX_TAGS: usize = 10;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 50;

/// Stored post. `content` holds the editor's block array serialized as JSON
/// text; `content_html` is the client-derived render of the same blocks and
/// is never re-derived server side.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub content_html: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author_id: Id,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub content_html: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author_id: Id,
    pub author_name: String,
}

/// Partial update; `None` fields are left untouched. Slug is deliberately
/// absent: it is fixed at creation so permalinks survive title edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_html: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Stored account. Password hash is only present for email+password accounts;
/// social-only accounts carry `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub image: Option<String>,
}

/// Link between a local user and an identity at an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthAccount {
    pub id: Id,
    pub provider: String,
    pub provider_account_id: String,
    pub user_id: Id,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub author_id: Option<Id>,
}

// ---------------- wire types (camelCase, matching the public API) ----------------

/// Post without its content fields, as returned by list endpoints and
/// create/update confirmations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostMeta {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author_id: Id,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Post> for PostMeta {
    fn from(p: &Post) -> Self {
        PostMeta {
            id: p.id,
            title: p.title.clone(),
            slug: p.slug.clone(),
            category: p.category.clone(),
            tags: p.tags.clone(),
            author_id: p.author_id,
            author_name: p.author_name.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Full post for single-post reads; `content` is the parsed block array.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub content: serde_json::Value,
    pub content_html: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author_id: Id,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostDetail {
    /// Pair a stored post with its already-parsed block array.
    pub fn from_parts(post: &Post, content: serde_json::Value) -> Self {
        PostDetail {
            id: post.id,
            title: post.title.clone(),
            slug: post.slug.clone(),
            content,
            content_html: post.content_html.clone(),
            category: post.category.clone(),
            tags: post.tags.clone(),
            author_id: post.author_id,
            author_name: post.author_name.clone(),
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Pagination {
            page,
            limit,
            total,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostListResponse {
    pub posts: Vec<PostMeta>,
    pub pagination: Pagination,
}

/// Account shape exposed to clients; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub image: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        UserInfo {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            role: u.role,
            image: u.image.clone(),
        }
    }
}

// ---------------- field rules ----------------

/// Slug derivation used once at creation: lowercase, strip everything outside
/// `[a-z0-9 ]`, collapse whitespace runs to single hyphens, then suffix the
/// creation timestamp in milliseconds so equal titles stay unique.
pub fn generate_slug(title: &str, now_ms: i64) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let base = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    if base.is_empty() {
        format!("post-{}", now_ms)
    } else {
        format!("{}-{}", base, now_ms)
    }
}

/// Tag cleanup applied on create and update: keep the first ten entries,
/// trim and lowercase each, drop empties, dedupe preserving first occurrence.
pub fn normalize_tags(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tag in raw.iter().take(MAX_TAGS) {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if seen.insert(tag.clone()) {
            out.push(tag);
        }
    }
    out
}

// Length rules count characters, not bytes, so multibyte titles are
// measured the way authors see them.
fn title_error(title: &str) -> Option<String> {
    let len = title.chars().count();
    if len < 3 {
        Some("Title must be at least 3 characters".to_string())
    } else if len > 200 {
        Some("Title cannot exceed 200 characters".to_string())
    } else {
        None
    }
}

fn content_error(content: &str) -> Option<String> {
    (content.chars().count() < 10).then(|| "Content must be at least 10 characters".to_string())
}

fn content_html_error(content_html: &str) -> Option<String> {
    (content_html.trim().chars().count() < 10)
        .then(|| "Content HTML must be at least 10 characters".to_string())
}

fn category_error(category: &str) -> Option<String> {
    let len = category.chars().count();
    if len < 2 {
        Some("Category must be at least 2 characters".to_string())
    } else if len > 50 {
        Some("Category cannot exceed 50 characters".to_string())
    } else {
        None
    }
}

/// Schema-level checks for a full document. Inputs are the values as they
/// will be stored (title/category already trimmed, content serialized).
/// Returns one message per offending wire field; empty map means valid.
pub fn validate_post_fields(
    title: &str,
    content: &str,
    content_html: &str,
    category: &str,
) -> BTreeMap<&'static str, String> {
    let mut errors = BTreeMap::new();
    if let Some(msg) = title_error(title) {
        errors.insert("title", msg);
    }
    if let Some(msg) = content_error(content) {
        errors.insert("content", msg);
    }
    if let Some(msg) = content_html_error(content_html) {
        errors.insert("contentHtml", msg);
    }
    if let Some(msg) = category_error(category) {
        errors.insert("category", msg);
    }
    errors
}

/// Same rules applied to only the fields a partial update carries.
pub fn validate_post_update(upd: &PostUpdate) -> BTreeMap<&'static str, String> {
    let mut errors = BTreeMap::new();
    if let Some(msg) = upd.title.as_deref().and_then(title_error) {
        errors.insert("title", msg);
    }
    if let Some(msg) = upd.content.as_deref().and_then(content_error) {
        errors.insert("content", msg);
    }
    if let Some(msg) = upd.content_html.as_deref().and_then(content_html_error) {
        errors.insert("contentHtml", msg);
    }
    if let Some(msg) = upd.category.as_deref().and_then(category_error) {
        errors.insert("category", msg);
    }
    errors
}

/// The editor contract: content must be a JSON array of block objects.
pub fn is_block_array(v: &serde_json::Value) -> bool {
    match v.as_array() {
        Some(blocks) => blocks.iter().all(|b| b.is_object()),
        None => false,
    }
}
