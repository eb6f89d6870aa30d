//! Server-rendered HTML pages.
//!
//! Pages are advisory guards only: they redirect or render placeholders for
//! visitors who lack a session or a role, but the JSON API re-checks every
//! permission on its own. Templates are compiled into the binary so the
//! server has no runtime template directory to configure.

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::auth::{Claims, MaybeAuth, Role};
use crate::error::ApiError;
use crate::models::{PostFilter, PostMeta};
use crate::nav;
use crate::repo::RepoError;
use crate::routes::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(landing)))
        .service(web::resource("/login").route(web::get().to(login_page)))
        .service(web::resource("/register").route(web::get().to(register_page)))
        .service(web::resource("/dashboard").route(web::get().to(dashboard)))
        .service(web::resource("/posts/create").route(web::get().to(post_create_page)))
        .service(web::resource("/posts/{slug}").route(web::get().to(post_view)))
        .service(web::resource("/admin").route(web::get().to(admin_page)));
    #[cfg(feature = "embed-assets")]
    cfg.service(web::resource("/assets/{path:.*}").route(web::get().to(asset)));
}

/// Parse the embedded templates. Called once at startup; the pages cannot
/// work without them, so a broken template is a build defect and panics.
pub fn build_templates() -> tera::Tera {
    let mut tera = tera::Tera::default();
    tera.add_raw_templates(vec![
        ("base.html", include_str!("../templates/base.html")),
        ("landing.html", include_str!("../templates/landing.html")),
        ("login.html", include_str!("../templates/login.html")),
        ("register.html", include_str!("../templates/register.html")),
        ("dashboard.html", include_str!("../templates/dashboard.html")),
        ("post.html", include_str!("../templates/post.html")),
        ("post_create.html", include_str!("../templates/post_create.html")),
        ("admin.html", include_str!("../templates/admin.html")),
        ("not_found.html", include_str!("../templates/not_found.html")),
        ("unauthorized.html", include_str!("../templates/unauthorized.html")),
    ])
    .expect("embedded templates parse");
    tera
}

#[derive(Debug, Serialize)]
struct SocialLinks {
    github: Option<String>,
    twitter: Option<String>,
    linkedin: Option<String>,
    email: Option<String>,
}

fn social_links() -> SocialLinks {
    SocialLinks {
        github: std::env::var("SOCIAL_GITHUB_URL").ok(),
        twitter: std::env::var("SOCIAL_TWITTER_URL").ok(),
        linkedin: std::env::var("SOCIAL_LINKEDIN_URL").ok(),
        email: std::env::var("SOCIAL_EMAIL").ok(),
    }
}

#[derive(Debug, Serialize)]
struct Viewer<'a> {
    name: &'a str,
    role: Role,
}

fn base_context(claims: Option<&Claims>) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("brand", "beyondlocalhost");
    ctx.insert(
        "tagline",
        "Building, breaking, and learning in web development and cybersecurity",
    );
    ctx.insert("social", &social_links());
    // always present so templates can branch on it without `is defined`
    let viewer = claims.map(|c| Viewer {
        name: &c.name,
        role: c.role,
    });
    ctx.insert("viewer", &viewer);
    ctx
}

fn render_page(
    data: &AppState,
    name: &str,
    ctx: &tera::Context,
    status: StatusCode,
) -> Result<HttpResponse, ApiError> {
    let html = data
        .templates
        .render(name, ctx)
        .map_err(|e| ApiError::Internal(format!("render {name}: {e}")))?;
    Ok(HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(html))
}

fn render(data: &AppState, name: &str, ctx: &tera::Context) -> Result<HttpResponse, ApiError> {
    render_page(data, name, ctx, StatusCode::OK)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("Location", location.to_string()))
        .finish()
}

pub async fn landing(data: web::Data<AppState>, auth: MaybeAuth) -> Result<HttpResponse, ApiError> {
    let (posts, _) = data.repo.list_posts(PostFilter::default(), 1, 3).await?;
    let posts: Vec<PostMeta> = posts.iter().map(PostMeta::from).collect();
    let mut ctx = base_context(auth.0.as_ref());
    ctx.insert("posts", &posts);
    render(&data, "landing.html", &ctx)
}

pub async fn login_page(
    data: web::Data<AppState>,
    auth: MaybeAuth,
) -> Result<HttpResponse, ApiError> {
    if let Some(claims) = auth.0 {
        return Ok(redirect(claims.role.landing_destination()));
    }
    render(&data, "login.html", &base_context(None))
}

pub async fn register_page(
    data: web::Data<AppState>,
    auth: MaybeAuth,
) -> Result<HttpResponse, ApiError> {
    if let Some(claims) = auth.0 {
        return Ok(redirect(claims.role.landing_destination()));
    }
    render(&data, "register.html", &base_context(None))
}

pub async fn dashboard(
    data: web::Data<AppState>,
    auth: MaybeAuth,
) -> Result<HttpResponse, ApiError> {
    let Some(claims) = auth.0 else {
        return Ok(redirect("/login"));
    };
    let filter = PostFilter {
        author_id: Some(claims.user_id()?),
        ..Default::default()
    };
    let (recent, total) = data.repo.list_posts(filter, 1, 5).await?;
    let recent: Vec<PostMeta> = recent.iter().map(PostMeta::from).collect();

    let mut ctx = base_context(Some(&claims));
    ctx.insert("nav", &nav::nav_for_role(claims.role));
    ctx.insert("breadcrumbs", &nav::breadcrumbs("/dashboard"));
    ctx.insert("post_count", &total);
    ctx.insert("recent_posts", &recent);
    render(&data, "dashboard.html", &ctx)
}

pub async fn post_create_page(
    data: web::Data<AppState>,
    auth: MaybeAuth,
) -> Result<HttpResponse, ApiError> {
    let Some(claims) = auth.0 else {
        return Ok(redirect("/login"));
    };
    let mut ctx = base_context(Some(&claims));
    ctx.insert("nav", &nav::nav_for_role(claims.role));
    ctx.insert("breadcrumbs", &nav::breadcrumbs("/posts/create"));
    render(&data, "post_create.html", &ctx)
}

pub async fn post_view(
    data: web::Data<AppState>,
    path: web::Path<String>,
    auth: MaybeAuth,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    match data.repo.get_post_by_slug(&slug).await {
        Ok(post) => {
            let mut ctx = base_context(auth.0.as_ref());
            ctx.insert("post", &PostMeta::from(&post));
            // stored HTML is trusted as authored; templates mark it safe
            ctx.insert("content_html", &post.content_html);
            render(&data, "post.html", &ctx)
        }
        Err(RepoError::NotFound) => render_page(
            &data,
            "not_found.html",
            &base_context(auth.0.as_ref()),
            StatusCode::NOT_FOUND,
        ),
        Err(e) => Err(e.into()),
    }
}

pub async fn admin_page(
    data: web::Data<AppState>,
    auth: MaybeAuth,
) -> Result<HttpResponse, ApiError> {
    let Some(claims) = auth.0 else {
        return Ok(redirect("/login"));
    };
    // the page itself is advisory; it serves normally and swaps its content,
    // while the admin API keeps returning 403 on its own checks
    if !claims.role.satisfies(Role::Admin) {
        return render(&data, "unauthorized.html", &base_context(Some(&claims)));
    }
    let mut ctx = base_context(Some(&claims));
    ctx.insert("nav", &nav::nav_for_role(claims.role));
    ctx.insert("breadcrumbs", &nav::breadcrumbs("/admin"));
    render(&data, "admin.html", &ctx)
}

#[cfg(feature = "embed-assets")]
mod embedded {
    use rust_embed::RustEmbed;

    #[derive(RustEmbed)]
    #[folder = "assets/"]
    pub struct Assets;

    pub fn content_type_for(path: &str) -> mime::Mime {
        match path.rsplit('.').next() {
            Some("css") => mime::TEXT_CSS,
            Some("js") => mime::APPLICATION_JAVASCRIPT,
            Some("svg") => mime::IMAGE_SVG,
            Some("png") => mime::IMAGE_PNG,
            _ => mime::APPLICATION_OCTET_STREAM,
        }
    }
}

#[cfg(feature = "embed-assets")]
pub async fn asset(path: web::Path<String>) -> HttpResponse {
    let rel = path.into_inner();
    match embedded::Assets::get(&rel) {
        Some(file) => HttpResponse::Ok()
            .content_type(embedded::content_type_for(&rel).as_ref())
            .body(file.data.into_owned()),
        None => HttpResponse::NotFound().finish(),
    }
}
