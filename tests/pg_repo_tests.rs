#![cfg(feature = "postgres-store")]

//! Exercises the Postgres backend against a live database. Each test skips
//! itself when DATABASE_URL is not set, so the suite stays green on machines
//! without Postgres. Slugs and emails are randomized because the database is
//! shared and not wiped between runs.

use blh::auth::Role;
use blh::models::{NewPost, NewUser, PostFilter, PostUpdate};
use blh::repo::pg::PgRepo;
use blh::repo::{PostRepo, RepoError, UserRepo};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn pg_repo() -> Option<PgRepo> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await
        .ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(PgRepo::new(pool))
}

async fn seed_user(repo: &PgRepo, tag: &str) -> blh::models::User {
    repo.create_user(NewUser {
        email: format!("{tag}-{}@example.com", Uuid::new_v4()),
        name: tag.to_string(),
        password_hash: None,
        role: Role::User,
        image: None,
    })
    .await
    .expect("seed user")
}

fn new_post(slug: &str, author: &blh::models::User) -> NewPost {
    NewPost {
        title: format!("Post {slug}"),
        slug: slug.to_string(),
        content: r#"[{"type":"paragraph","content":"hello from postgres"}]"#.to_string(),
        content_html: "<p>hello from postgres</p>".to_string(),
        category: "tech".to_string(),
        tags: vec!["rust".to_string(), "sqlx".to_string()],
        author_id: author.id,
        author_name: author.name.clone(),
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn pg_post_crud_round_trip() {
    let Some(repo) = pg_repo().await else {
        eprintln!("skip: no DATABASE_URL");
        return;
    };
    let author = seed_user(&repo, "pg-author").await;
    let slug = format!("pg-roundtrip-{}", Uuid::new_v4());

    let created = repo.create_post(new_post(&slug, &author)).await.unwrap();
    assert_eq!(created.slug, slug);
    assert_eq!(created.tags, vec!["rust", "sqlx"]);

    // duplicate slug trips the unique constraint
    let err = repo.create_post(new_post(&slug, &author)).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let fetched = repo.get_post_by_slug(&slug).await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.content, created.content);

    let updated = repo
        .update_post(
            &slug,
            author.id,
            PostUpdate {
                category: Some("databases".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.category, "databases");
    assert_eq!(updated.title, created.title);

    repo.delete_post(&slug, author.id).await.unwrap();
    let err = repo.get_post_by_slug(&slug).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[actix_web::test]
#[serial_test::serial]
async fn pg_writes_are_owner_scoped() {
    let Some(repo) = pg_repo().await else {
        eprintln!("skip: no DATABASE_URL");
        return;
    };
    let owner = seed_user(&repo, "pg-owner").await;
    let intruder = seed_user(&repo, "pg-intruder").await;
    let slug = format!("pg-owned-{}", Uuid::new_v4());
    repo.create_post(new_post(&slug, &owner)).await.unwrap();

    let err = repo
        .update_post(
            &slug,
            intruder.id,
            PostUpdate {
                title: Some("Taken over".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));

    let err = repo.delete_post(&slug, intruder.id).await.unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));

    // a slug that never existed is NotFound, not Forbidden
    let err = repo
        .delete_post(&format!("pg-missing-{}", Uuid::new_v4()), intruder.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    repo.delete_post(&slug, owner.id).await.unwrap();
}

#[actix_web::test]
#[serial_test::serial]
async fn pg_list_filters_by_tag_and_author() {
    let Some(repo) = pg_repo().await else {
        eprintln!("skip: no DATABASE_URL");
        return;
    };
    let author = seed_user(&repo, "pg-lister").await;
    let marker = Uuid::new_v4().to_string();

    for i in 0..3 {
        let mut p = new_post(&format!("pg-list-{marker}-{i}"), &author);
        p.tags = vec![marker.clone()];
        repo.create_post(p).await.unwrap();
    }

    let (posts, total) = repo
        .list_posts(
            PostFilter {
                tag: Some(marker.clone()),
                author_id: Some(author.id),
                ..Default::default()
            },
            1,
            2,
        )
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(posts.len(), 2);
    // newest first
    assert!(posts[0].created_at >= posts[1].created_at);

    for i in 0..3 {
        repo.delete_post(&format!("pg-list-{marker}-{i}"), author.id)
            .await
            .unwrap();
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn pg_users_roles_and_oauth_links() {
    let Some(repo) = pg_repo().await else {
        eprintln!("skip: no DATABASE_URL");
        return;
    };
    let user = seed_user(&repo, "pg-roles").await;

    let promoted = repo.set_user_role(user.id, Role::Manager).await.unwrap();
    assert_eq!(promoted.role, Role::Manager);
    assert_eq!(repo.get_user(user.id).await.unwrap().role, Role::Manager);

    let account_id = Uuid::new_v4().to_string();
    assert!(repo
        .find_user_by_oauth("github", &account_id)
        .await
        .unwrap()
        .is_none());
    repo.link_oauth_account(user.id, "github", &account_id)
        .await
        .unwrap();
    // second link is a no-op thanks to ON CONFLICT DO NOTHING
    repo.link_oauth_account(user.id, "github", &account_id)
        .await
        .unwrap();
    let linked = repo
        .find_user_by_oauth("github", &account_id)
        .await
        .unwrap()
        .expect("linked user");
    assert_eq!(linked.id, user.id);
}
