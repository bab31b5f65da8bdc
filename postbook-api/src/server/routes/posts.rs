use crate::server::{
    Result, ServerError, ServerRouter,
    json::{Created, Empty, Json},
    with_db,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use postbook_common::model::{
    Id,
    post::{CreatePost, Post, PostMarker},
};
use postbook_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_delete(delete_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct CreatePostPath();

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    Json(post): Json<CreatePost>,
) -> Result<Created<Post>> {
    let post = with_db(db, move |db| Ok(db.create_post(&post)?)).await?;

    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Post>> {
    let post = with_db(db, move |db| Ok(db.fetch_post(id)?)).await?;

    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Empty>> {
    with_db(db, move |db| Ok(db.delete_post(id)?)).await?;

    Ok(Json(Empty {}))
}
