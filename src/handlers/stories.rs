// Story handlers: generation and history

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    app::AppState,
    middleware::AuthenticatedUser,
    models::{StoryListResponse, StoryPagination, UserStory, UserStoryRequest},
    services::GeneratedStory,
    utils::service_error::ServiceError,
};

/// Generate a user story, charged against the caller's entitlement
/// POST /api/v1/stories
#[utoipa::path(
    post,
    path = "/v1/stories",
    tag = "Stories",
    operation_id = "generateStory",
    request_body = UserStoryRequest,
    responses(
        (status = 201, description = "Story generated and stored", body = GeneratedStory),
        (status = 400, description = "Bad request - validation failed"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 402, description = "No generations left; body carries the entitlement"),
        (status = 502, description = "Story generator failed; nothing was charged")
    ),
    security(("bearerAuth" = []))
)]
pub async fn generate_story(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    Json(request): Json<UserStoryRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let generated = state
        .story_service
        .generate(auth_user.user_id, auth_user.email(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(generated)))
}

/// List the caller's stories, newest first
/// GET /api/v1/stories
#[utoipa::path(
    get,
    path = "/v1/stories",
    tag = "Stories",
    operation_id = "listStories",
    params(StoryPagination),
    responses(
        (status = 200, description = "Page of stories", body = StoryListResponse),
        (status = 401, description = "Unauthorized - invalid or missing token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_stories(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    Query(pagination): Query<StoryPagination>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .story_service
        .list(auth_user.user_id, &pagination)
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/stories/{id}
#[utoipa::path(
    get,
    path = "/v1/stories/{id}",
    tag = "Stories",
    operation_id = "getStory",
    params(("id" = Uuid, Path, description = "Story ID")),
    responses(
        (status = 200, description = "Story", body = UserStory),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "Story not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_story(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let story = state.story_service.get(auth_user.user_id, id).await?;
    Ok(Json(story))
}

/// Story rendered as Markdown
/// GET /api/v1/stories/{id}/markdown
#[utoipa::path(
    get,
    path = "/v1/stories/{id}/markdown",
    tag = "Stories",
    operation_id = "exportStoryMarkdown",
    params(("id" = Uuid, Path, description = "Story ID")),
    responses(
        (status = 200, description = "Markdown document", content_type = "text/markdown", body = String),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "Story not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn export_story_markdown(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let markdown = state.story_service.markdown(auth_user.user_id, id).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    ))
}

/// Delete one story; usage already charged is kept
/// DELETE /api/v1/stories/{id}
#[utoipa::path(
    delete,
    path = "/v1/stories/{id}",
    tag = "Stories",
    operation_id = "deleteStory",
    params(("id" = Uuid, Path, description = "Story ID")),
    responses(
        (status = 204, description = "Story deleted"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "Story not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_story(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.story_service.delete(auth_user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete all of the caller's stories
/// DELETE /api/v1/stories
#[utoipa::path(
    delete,
    path = "/v1/stories",
    tag = "Stories",
    operation_id = "deleteAllStories",
    responses(
        (status = 200, description = "Number of deleted stories"),
        (status = 401, description = "Unauthorized - invalid or missing token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_all_stories(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let deleted = state.story_service.delete_all(auth_user.user_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
