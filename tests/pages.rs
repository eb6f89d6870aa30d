#![cfg(feature = "inmem-store")]

use actix_web::cookie::Cookie;
use actix_web::http::header;
use actix_web::{test, App};
use blh::auth::{create_jwt, Role, TokenKind, ACCESS_COOKIE};
use blh::models::NewPost;
use blh::repo::inmem::InMemRepo;
use blh::repo::PostRepo;
use blh::{pages, AppState};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("AUTH_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("BLH_DATA_DIR", tmp.path().to_str().unwrap());
}

fn session(id: i64, name: &str, role: Role) -> Cookie<'static> {
    Cookie::new(
        ACCESS_COOKIE,
        create_jwt(id, name, role, TokenKind::Access).unwrap(),
    )
}

fn new_post(slug: &str, title: &str, author_id: i64) -> NewPost {
    NewPost {
        title: title.to_string(),
        slug: slug.to_string(),
        content: r#"[{"type":"paragraph","content":"hello world"}]"#.to_string(),
        content_html: "<p>hello world</p>".to_string(),
        category: "tech".to_string(),
        tags: vec![],
        author_id,
        author_name: "alice".to_string(),
    }
}

macro_rules! init_app {
    ($repo:expr) => {
        test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(AppState::new(
                    Arc::new($repo),
                    None,
                )))
                .configure(pages::config)
                .configure(blh::config),
        )
        .await
    };
}

async fn body_of(resp: actix_web::dev::ServiceResponse) -> String {
    String::from_utf8(test::read_body(resp).await.to_vec()).unwrap()
}

#[actix_web::test]
#[serial]
async fn dashboard_redirects_anonymous_visitors_to_login() {
    setup_env();
    let app = init_app!(InMemRepo::new());

    let req = test::TestRequest::get().uri("/dashboard").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");

    // the post editor page is guarded the same way
    let req = test::TestRequest::get().uri("/posts/create").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
}

#[actix_web::test]
#[serial]
async fn dashboard_renders_for_a_session() {
    setup_env();
    let repo = InMemRepo::new();
    repo.create_post(new_post("mine-1", "My dashboard post", 1))
        .await
        .unwrap();
    let app = init_app!(repo);

    let req = test::TestRequest::get()
        .uri("/dashboard")
        .cookie(session(1, "alice", Role::User))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let html = body_of(resp).await;
    assert!(html.contains("Welcome back, alice"));
    assert!(html.contains("My dashboard post"));
}

#[actix_web::test]
#[serial]
async fn admin_page_swaps_content_for_non_admins() {
    setup_env();
    let app = init_app!(InMemRepo::new());

    // the page serves normally and swaps its content; the API keeps the 403
    let req = test::TestRequest::get()
        .uri("/admin")
        .cookie(session(2, "carol", Role::User))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let html = body_of(resp).await;
    assert!(html.contains("Unauthorized"));
    assert!(html.contains("does not have access"));

    // managers are still short of the bar
    let req = test::TestRequest::get()
        .uri("/admin")
        .cookie(session(3, "mel", Role::Manager))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(body_of(resp).await.contains("Unauthorized"));

    // admins get the real page
    let req = test::TestRequest::get()
        .uri("/admin")
        .cookie(session(4, "root", Role::Admin))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(body_of(resp).await.contains("User roles"));

    // anonymous visitors never see either variant
    let req = test::TestRequest::get().uri("/admin").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
}

#[actix_web::test]
#[serial]
async fn landing_shows_the_three_newest_posts() {
    setup_env();
    let repo = InMemRepo::new();
    for (slug, title) in [
        ("first-1", "Oldest entry"),
        ("second-1", "Middle entry"),
        ("third-1", "Newer entry"),
        ("fourth-1", "Newest entry"),
    ] {
        repo.create_post(new_post(slug, title, 1)).await.unwrap();
    }
    let app = init_app!(repo);

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let html = body_of(resp).await;
    assert!(html.contains("Newest entry"));
    assert!(html.contains("Newer entry"));
    assert!(html.contains("Middle entry"));
    // only the three most recent make the cut
    assert!(!html.contains("Oldest entry"));
}

#[actix_web::test]
#[serial]
async fn auth_pages_redirect_signed_in_visitors() {
    setup_env();
    let app = init_app!(InMemRepo::new());

    let req = test::TestRequest::get()
        .uri("/login")
        .cookie(session(1, "alice", Role::User))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/");

    // admins land on the admin area instead
    let req = test::TestRequest::get()
        .uri("/register")
        .cookie(session(2, "root", Role::Admin))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/admin");
}

#[actix_web::test]
#[serial]
async fn post_page_renders_stored_html_or_404() {
    setup_env();
    let repo = InMemRepo::new();
    let mut p = new_post("visible-1", "A visible post", 1);
    p.content_html = "<p>rendered <strong>blocks</strong></p>".to_string();
    repo.create_post(p).await.unwrap();
    let app = init_app!(repo);

    let req = test::TestRequest::get().uri("/posts/visible-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let html = body_of(resp).await;
    // stored HTML lands unescaped in the page body
    assert!(html.contains("<p>rendered <strong>blocks</strong></p>"));

    let req = test::TestRequest::get().uri("/posts/never-was-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert!(body_of(resp).await.contains("does not exist"));
}
