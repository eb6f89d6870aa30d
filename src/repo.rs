use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::auth::Role;
use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Filtered page of posts, newest first, plus the total matching count.
    /// The count is taken separately from the page read, so the two can be
    /// skewed by concurrent writes.
    async fn list_posts(
        &self,
        filter: PostFilter,
        page: i64,
        limit: i64,
    ) -> RepoResult<(Vec<Post>, i64)>;
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post>;
    /// Owner-scoped update: the author check and the mutation are a single
    /// conditional write, so ownership cannot change between them.
    /// `Forbidden` means the post exists but belongs to someone else.
    async fn update_post(&self, slug: &str, author_id: Id, upd: PostUpdate) -> RepoResult<Post>;
    /// Owner-scoped delete with the same conditional-write contract.
    async fn delete_post(&self, slug: &str, author_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<User>;
    async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User>;
    async fn count_users(&self) -> RepoResult<i64>;
    async fn find_user_by_oauth(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> RepoResult<Option<User>>;
    async fn link_oauth_account(
        &self,
        user_id: Id,
        provider: &str,
        provider_account_id: &str,
    ) -> RepoResult<()>;
}

pub trait Repo: PostRepo + UserRepo {}

impl<T> Repo for T where T: PostRepo + UserRepo {}

fn matches_filter(post: &Post, filter: &PostFilter) -> bool {
    if let Some(ref category) = filter.category {
        if post.category != *category {
            return false;
        }
    }
    if let Some(ref tag) = filter.tag {
        if !post.tags.iter().any(|t| t == tag) {
            return false;
        }
    }
    if let Some(author_id) = filter.author_id {
        if post.author_id != author_id {
            return false;
        }
    }
    true
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<Id, Post>,
        users: HashMap<Id, User>,
        oauth_accounts: HashMap<Id, OauthAccount>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("BLH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("BLH_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        eprintln!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        eprintln!(
                            "[inmem] Failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(e) => {
                    eprintln!(
                        "[inmem] No snapshot at '{}': {e}. Starting empty.",
                        path.display()
                    );
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    eprintln!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(
            &self,
            filter: PostFilter,
            page: i64,
            limit: i64,
        ) -> RepoResult<(Vec<Post>, i64)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .posts
                .values()
                .filter(|p| matches_filter(p, &filter))
                .cloned()
                .collect();
            // newest first; id breaks creation-time ties so pages stay disjoint
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            let total = v.len() as i64;
            // saturate so an absurd page yields an empty slice, not overflow
            let offset = (page - 1).saturating_mul(limit).min(total) as usize;
            let page_rows: Vec<_> = v.into_iter().skip(offset).take(limit as usize).collect();
            Ok((page_rows, total))
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            if s.posts.values().any(|p| p.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                title: new.title,
                slug: new.slug,
                content: new.content,
                content_html: new.content_html,
                category: new.category,
                tags: new.tags,
                author_id: new.author_id,
                author_name: new.author_name,
                created_at: now,
                updated_at: now,
            };
            s.posts.insert(id, post.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(post)
        }

        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts
                .values()
                .find(|p| p.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn update_post(
            &self,
            slug: &str,
            author_id: Id,
            upd: PostUpdate,
        ) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let post = s
                .posts
                .values_mut()
                .find(|p| p.slug == slug)
                .ok_or(RepoError::NotFound)?;
            if post.author_id != author_id {
                return Err(RepoError::Forbidden);
            }
            if let Some(title) = upd.title {
                post.title = title;
            }
            if let Some(content) = upd.content {
                post.content = content;
            }
            if let Some(content_html) = upd.content_html {
                post.content_html = content_html;
            }
            if let Some(category) = upd.category {
                post.category = category;
            }
            if let Some(tags) = upd.tags {
                post.tags = tags;
            }
            post.updated_at = Utc::now();
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_post(&self, slug: &str, author_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let (id, owner) = s
                .posts
                .iter()
                .find(|(_, p)| p.slug == slug)
                .map(|(id, p)| (*id, p.author_id))
                .ok_or(RepoError::NotFound)?;
            if owner != author_id {
                return Err(RepoError::Forbidden);
            }
            s.posts.remove(&id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                email: new.email,
                name: new.name,
                password_hash: new.password_hash,
                role: new.role,
                image: new.image,
                created_at: now,
                updated_at: now,
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.email == email)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.role = role;
            user.updated_at = Utc::now();
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn count_users(&self) -> RepoResult<i64> {
            let s = self.state.read().unwrap();
            Ok(s.users.len() as i64)
        }

        async fn find_user_by_oauth(
            &self,
            provider: &str,
            provider_account_id: &str,
        ) -> RepoResult<Option<User>> {
            let s = self.state.read().unwrap();
            let user_id = s
                .oauth_accounts
                .values()
                .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
                .map(|a| a.user_id);
            Ok(user_id.and_then(|id| s.users.get(&id).cloned()))
        }

        async fn link_oauth_account(
            &self,
            user_id: Id,
            provider: &str,
            provider_account_id: &str,
        ) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let already = s
                .oauth_accounts
                .values()
                .any(|a| a.provider == provider && a.provider_account_id == provider_account_id);
            if !already {
                let id = Self::next_id(&mut s);
                let account = OauthAccount {
                    id,
                    provider: provider.to_string(),
                    provider_account_id: provider_account_id.to_string(),
                    user_id,
                };
                s.oauth_accounts.insert(id, account);
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres};

    const POST_COLUMNS: &str = "id, title, slug, content, content_html, category, tags, \
                                author_id, author_name, created_at, updated_at";
    const USER_COLUMNS: &str =
        "id, email, name, password_hash, role, image, created_at, updated_at";

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn map_sqlx(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepoError::Conflict
            }
            _ => RepoError::Internal(e.to_string()),
        }
    }

    // Roles live in a plain text column; reject rows that predate the enum.
    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: Id,
        email: String,
        name: String,
        password_hash: Option<String>,
        role: String,
        image: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    fn user_from_row(row: UserRow) -> RepoResult<User> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| RepoError::Internal(format!("unknown role '{}' in users row", row.role)))?;
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role,
            image: row.image,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(
            &self,
            filter: PostFilter,
            page: i64,
            limit: i64,
        ) -> RepoResult<(Vec<Post>, i64)> {
            let rows = sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE ($1::text IS NULL OR category = $1) \
                   AND ($2::text IS NULL OR $2 = ANY(tags)) \
                   AND ($3::bigint IS NULL OR author_id = $3) \
                 ORDER BY created_at DESC, id DESC \
                 LIMIT $4 OFFSET $5"
            ))
            .bind(&filter.category)
            .bind(&filter.tag)
            .bind(filter.author_id)
            .bind(limit)
            // saturate so an absurd page yields an empty page, not overflow
            .bind((page - 1).saturating_mul(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

            let (total,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM posts \
                 WHERE ($1::text IS NULL OR category = $1) \
                   AND ($2::text IS NULL OR $2 = ANY(tags)) \
                   AND ($3::bigint IS NULL OR author_id = $3)",
            )
            .bind(&filter.category)
            .bind(&filter.tag)
            .bind(filter.author_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;

            Ok((rows, total))
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let post = sqlx::query_as::<_, Post>(&format!(
                "INSERT INTO posts (title, slug, content, content_html, category, tags, \
                                    author_id, author_name) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 RETURNING {POST_COLUMNS}"
            ))
            .bind(&new.title)
            .bind(&new.slug)
            .bind(&new.content)
            .bind(&new.content_html)
            .bind(&new.category)
            .bind(&new.tags)
            .bind(new.author_id)
            .bind(&new.author_name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
            Ok(post)
        }

        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE slug = $1"
            ))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(RepoError::NotFound)
        }

        async fn update_post(
            &self,
            slug: &str,
            author_id: Id,
            upd: PostUpdate,
        ) -> RepoResult<Post> {
            let updated = sqlx::query_as::<_, Post>(&format!(
                "UPDATE posts SET \
                   title = COALESCE($3, title), \
                   content = COALESCE($4, content), \
                   content_html = COALESCE($5, content_html), \
                   category = COALESCE($6, category), \
                   tags = COALESCE($7, tags), \
                   updated_at = now() \
                 WHERE slug = $1 AND author_id = $2 \
                 RETURNING {POST_COLUMNS}"
            ))
            .bind(slug)
            .bind(author_id)
            .bind(&upd.title)
            .bind(&upd.content)
            .bind(&upd.content_html)
            .bind(&upd.category)
            .bind(&upd.tags)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

            match updated {
                Some(post) => Ok(post),
                // Zero rows: either no such slug or someone else's post.
                None => {
                    let exists: Option<(Id,)> =
                        sqlx::query_as("SELECT id FROM posts WHERE slug = $1")
                            .bind(slug)
                            .fetch_optional(&self.pool)
                            .await
                            .map_err(map_sqlx)?;
                    match exists {
                        Some(_) => Err(RepoError::Forbidden),
                        None => Err(RepoError::NotFound),
                    }
                }
            }
        }

        async fn delete_post(&self, slug: &str, author_id: Id) -> RepoResult<()> {
            let result = sqlx::query("DELETE FROM posts WHERE slug = $1 AND author_id = $2")
                .bind(slug)
                .bind(author_id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
            if result.rows_affected() > 0 {
                return Ok(());
            }
            let exists: Option<(Id,)> = sqlx::query_as("SELECT id FROM posts WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
            match exists {
                Some(_) => Err(RepoError::Forbidden),
                None => Err(RepoError::NotFound),
            }
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "INSERT INTO users (email, name, password_hash, role, image) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING {USER_COLUMNS}"
            ))
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.password_hash)
            .bind(new.role.as_str())
            .bind(&new.image)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
            user_from_row(row)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(RepoError::NotFound)?;
            user_from_row(row)
        }

        async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
            ))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(RepoError::NotFound)?;
            user_from_row(row)
        }

        async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 \
                 RETURNING {USER_COLUMNS}"
            ))
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(RepoError::NotFound)?;
            user_from_row(row)
        }

        async fn count_users(&self) -> RepoResult<i64> {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
            Ok(count)
        }

        async fn find_user_by_oauth(
            &self,
            provider: &str,
            provider_account_id: &str,
        ) -> RepoResult<Option<User>> {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT u.id, u.email, u.name, u.password_hash, u.role, u.image, \
                        u.created_at, u.updated_at \
                 FROM users u \
                 JOIN oauth_accounts a ON a.user_id = u.id \
                 WHERE a.provider = $1 AND a.provider_account_id = $2",
            )
            .bind(provider)
            .bind(provider_account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
            row.map(user_from_row).transpose()
        }

        async fn link_oauth_account(
            &self,
            user_id: Id,
            provider: &str,
            provider_account_id: &str,
        ) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO oauth_accounts (user_id, provider, provider_account_id) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (provider, provider_account_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(provider)
            .bind(provider_account_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
            Ok(())
        }
    }
}
