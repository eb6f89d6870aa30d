use crate::models::{Pagination, PostDetail, PostListResponse, PostMeta, UserInfo};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::register,
        crate::routes::login,
        crate::routes::logout,
        crate::routes::auth_me,
        crate::routes::refresh_session,
        crate::routes::set_user_role,
        crate::routes::health,
    ),
    components(schemas(
        PostMeta, PostDetail, Pagination, PostListResponse, UserInfo,
        crate::auth::Role,
        crate::routes::CreatePostRequest, crate::routes::UpdatePostRequest,
        crate::routes::RegisterRequest, crate::routes::LoginRequest,
        crate::routes::SetRoleRequest,
    )),
    tags(
        (name = "posts", description = "Post operations"),
        (name = "auth", description = "Session and account operations"),
        (name = "admin", description = "Role administration"),
    )
)]
pub struct ApiDoc;
