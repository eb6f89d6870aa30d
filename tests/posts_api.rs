#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use blh::auth::{create_jwt, Role, TokenKind};
use blh::repo::inmem::InMemRepo;
use blh::{config, AppState, SecurityHeaders};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;

// Helper to ensure JWT secret present & unique temp data dir per test
fn setup_env() {
    std::env::set_var("AUTH_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("BLH_DATA_DIR", tmp.path().to_str().unwrap());
}

fn token(id: i64, name: &str) -> String {
    create_jwt(id, name, Role::User, TokenKind::Access).unwrap()
}

fn block_body() -> serde_json::Value {
    json!([
        {"id": "b1", "type": "paragraph", "content": "Hello from the editor, long enough."},
        {"id": "b2", "type": "codeBlock", "content": "fn main() {}"}
    ])
}

macro_rules! init_app {
    () => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(
                    actix_web::web::JsonConfig::default()
                        .error_handler(blh::error::json_error_handler),
                )
                .app_data(actix_web::web::Data::new(AppState::new(
                    Arc::new(InMemRepo::new()),
                    None,
                )))
                .configure(config),
        )
        .await
    };
}

#[actix_web::test]
#[serial]
async fn post_lifecycle_roundtrip() {
    setup_env();
    let app = init_app!();
    let author = token(1, "alice");

    // create
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", author)))
        .set_json(&json!({
            "title": "My First Post",
            "content": block_body(),
            "contentHtml": "<p>Hello from the editor, long enough.</p>",
            "category": "  Tech  ",
            "tags": [" Rust ", "rust", "Web"]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(created["message"], "Post created successfully");
    let slug = created["post"]["slug"].as_str().unwrap().to_string();
    assert!(slug.starts_with("my-first-post-"), "slug was {slug}");
    assert_eq!(created["post"]["category"], "tech");
    assert_eq!(created["post"]["tags"], json!(["rust", "web"]));
    assert_eq!(created["post"]["authorName"], "alice");
    // list/create confirmations never carry content fields
    assert!(created["post"].get("content").is_none());
    assert!(created["post"].get("contentHtml").is_none());

    // read back; stored block array must round-trip structurally
    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{}", slug))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let fetched: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(fetched["post"]["content"], block_body());
    assert_eq!(
        fetched["post"]["contentHtml"],
        "<p>Hello from the editor, long enough.</p>"
    );

    // update title only; slug must not move
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", slug))
        .insert_header(("Authorization", format!("Bearer {}", author)))
        .set_json(&json!({"title": "Renamed Post"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(updated["message"], "Post updated successfully");
    assert_eq!(updated["post"]["title"], "Renamed Post");
    assert_eq!(updated["post"]["slug"], slug.as_str());

    // delete
    let req = test::TestRequest::delete()
        .uri(&format!("/api/posts/{}", slug))
        .insert_header(("Authorization", format!("Bearer {}", author)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let deleted: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(deleted["message"], "Post deleted successfully");

    // gone
    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{}", slug))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "Post not found");
}

#[actix_web::test]
#[serial]
async fn create_requires_auth_and_fields() {
    setup_env();
    let app = init_app!();

    // anonymous
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .set_json(&json!({
            "title": "T", "content": [], "contentHtml": "x", "category": "c"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "Authentication required");

    // missing fields
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", token(1, "a"))))
        .set_json(&json!({"title": "Only a title"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "Missing required fields");
}

#[actix_web::test]
#[serial]
async fn create_rejects_bad_shapes() {
    setup_env();
    let app = init_app!();
    let auth = ("Authorization", format!("Bearer {}", token(1, "a")));

    // title bounds checked before anything else
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(auth.clone())
        .set_json(&json!({
            "title": "ab",
            "content": block_body(),
            "contentHtml": "<p>long enough html</p>",
            "category": "tech"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "Title must be between 3 and 200 characters");

    // content must be an array of objects
    for bad in [json!({"not": "an array"}), json!([1, 2, 3]), json!("text")] {
        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(auth.clone())
            .set_json(&json!({
                "title": "Valid title",
                "content": bad,
                "contentHtml": "<p>long enough html</p>",
                "category": "tech"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let err: serde_json::Value =
            serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(
            err["error"],
            "Content must be valid BlockNote JSON format (array of blocks)"
        );
    }

    // blank html
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(auth.clone())
        .set_json(&json!({
            "title": "Valid title",
            "content": block_body(),
            "contentHtml": "   ",
            "category": "tech"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "contentHtml must be a non-empty string");

    // malformed JSON body goes through the JSON error handler
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(auth)
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "Invalid JSON payload");
}

#[actix_web::test]
#[serial]
async fn field_rules_surface_as_validation_errors() {
    setup_env();
    let app = init_app!();

    // an empty block array passes the shape check but serializes to "[]",
    // which the length rules reject; short category joins it in the map
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", token(1, "a"))))
        .set_json(&json!({
            "title": "Valid title",
            "content": [],
            "contentHtml": "<p>long enough html</p>",
            "category": "t"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "Validation failed");
    assert_eq!(
        err["validationErrors"]["content"],
        "Content must be at least 10 characters"
    );
    assert_eq!(
        err["validationErrors"]["category"],
        "Category must be at least 2 characters"
    );
}

#[actix_web::test]
#[serial]
async fn only_the_author_may_write() {
    setup_env();
    let app = init_app!();
    let alice = token(1, "alice");
    let mallory = token(2, "mallory");

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", alice)))
        .set_json(&json!({
            "title": "Owned by alice",
            "content": block_body(),
            "contentHtml": "<p>long enough html</p>",
            "category": "tech"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let slug = created["post"]["slug"].as_str().unwrap().to_string();

    // anonymous update -> 401 before any ownership check
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", slug))
        .set_json(&json!({"title": "Hijacked title"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // someone else's update -> 403
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", slug))
        .insert_header(("Authorization", format!("Bearer {}", mallory)))
        .set_json(&json!({"title": "Hijacked title"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "You can only edit your own posts");

    // someone else's delete -> 403
    let req = test::TestRequest::delete()
        .uri(&format!("/api/posts/{}", slug))
        .insert_header(("Authorization", format!("Bearer {}", mallory)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(err["error"], "You can only delete your own posts");

    // unknown slug stays 404 even for a would-be writer
    let req = test::TestRequest::delete()
        .uri("/api/posts/never-existed-1")
        .insert_header(("Authorization", format!("Bearer {}", mallory)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn update_content_needs_fresh_html() {
    setup_env();
    let app = init_app!();
    let author = token(1, "alice");

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", author)))
        .set_json(&json!({
            "title": "Editable post",
            "content": block_body(),
            "contentHtml": "<p>long enough html</p>",
            "category": "tech"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let created: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let slug = created["post"]["slug"].as_str().unwrap().to_string();

    // content without html -> 400
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", slug))
        .insert_header(("Authorization", format!("Bearer {}", author)))
        .set_json(&json!({"content": block_body()}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(
        err["error"],
        "contentHtml must be provided when updating content"
    );

    // html alone is ignored; the stored html stays what it was
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", slug))
        .insert_header(("Authorization", format!("Bearer {}", author)))
        .set_json(&json!({"contentHtml": "<p>should not land anywhere</p>"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{}", slug))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let fetched: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(fetched["post"]["contentHtml"], "<p>long enough html</p>");
}

#[actix_web::test]
#[serial]
async fn listing_paginates_and_filters() {
    setup_env();
    let app = init_app!();
    let author_a = token(1, "alice");
    let author_b = token(2, "bob");

    for i in 0..12 {
        let (auth, category, tags) = if i % 3 == 0 {
            (&author_b, "security", json!(["ctf"]))
        } else {
            (&author_a, "tech", json!(["rust"]))
        };
        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(("Authorization", format!("Bearer {}", auth)))
            .set_json(&json!({
                "title": format!("Numbered post {i:02}"),
                "content": block_body(),
                "contentHtml": "<p>long enough html</p>",
                "category": category,
                "tags": tags
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
    }

    // defaults: page 1, limit 10
    let req = test::TestRequest::get().uri("/api/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let page1: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(page1["posts"].as_array().unwrap().len(), 10);
    assert_eq!(page1["pagination"]["total"], 12);
    assert_eq!(page1["pagination"]["totalPages"], 2);
    assert_eq!(page1["pagination"]["hasNextPage"], true);
    assert_eq!(page1["pagination"]["hasPrevPage"], false);

    // second page holds the remainder
    let req = test::TestRequest::get().uri("/api/posts?page=2").to_request();
    let resp = test::call_service(&app, req).await;
    let page2: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(page2["posts"].as_array().unwrap().len(), 2);
    assert_eq!(page2["pagination"]["hasNextPage"], false);
    assert_eq!(page2["pagination"]["hasPrevPage"], true);

    // pages are disjoint
    let slug_of = |v: &serde_json::Value| v["slug"].as_str().unwrap().to_string();
    let firsts: Vec<_> = page1["posts"].as_array().unwrap().iter().map(slug_of).collect();
    for s in page2["posts"].as_array().unwrap().iter().map(slug_of) {
        assert!(!firsts.contains(&s), "slug {s} appeared on both pages");
    }

    // a page number at the i64 ceiling returns an empty page, not an error
    let req = test::TestRequest::get()
        .uri("/api/posts?page=9223372036854775807&limit=10")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let deep: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(deep["posts"].as_array().unwrap().len(), 0);
    assert_eq!(deep["pagination"]["total"], 12);
    assert_eq!(deep["pagination"]["hasPrevPage"], true);

    // unparsable paging falls back to defaults; oversized limit clamps to 50
    let req = test::TestRequest::get()
        .uri("/api/posts?page=zero&limit=9999")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let all: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(all["pagination"]["page"], 1);
    assert_eq!(all["pagination"]["limit"], 50);
    assert_eq!(all["posts"].as_array().unwrap().len(), 12);

    // category filter
    let req = test::TestRequest::get()
        .uri("/api/posts?category=SECURITY")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let by_cat: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(by_cat["pagination"]["total"], 4);

    // tag filter
    let req = test::TestRequest::get().uri("/api/posts?tag=rust").to_request();
    let resp = test::call_service(&app, req).await;
    let by_tag: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(by_tag["pagination"]["total"], 8);

    // author filter; a non-numeric author matches nothing
    let req = test::TestRequest::get().uri("/api/posts?author=2").to_request();
    let resp = test::call_service(&app, req).await;
    let by_author: serde_json::Value =
        serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(by_author["pagination"]["total"], 4);

    let req = test::TestRequest::get()
        .uri("/api/posts?author=nobody")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let none: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(none["pagination"]["total"], 0);
    assert_eq!(none["pagination"]["totalPages"], 0);
}
