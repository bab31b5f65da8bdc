use crate::server::{
    Result, ServerError, ServerRouter,
    json::{Created, Empty, Json},
    with_db,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use postbook_common::model::{
    auth::HashedPassword,
    post::Post,
    user::{CreateUser, NewUserEmail, UpdateUser, UserEmail, UserProfile},
};
use postbook_db::client::{DbClient, DbError, DbErrorKind};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_user)
        .typed_get(get_user)
        .typed_put(update_user)
        .typed_delete(delete_user)
        .typed_get(get_user_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct CreateUserPath();

#[derive(Deserialize)]
struct CreateUserRequest {
    email: NewUserEmail,
    password: String,
    name: String,
    age: i64,
}

async fn create_user(
    CreateUserPath(): CreateUserPath,
    State(db): State<Arc<DbClient>>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Created<UserProfile>> {
    let user = with_db(db, move |db| {
        let email = UserEmail::from(request.email);

        // Skip hashing for taken emails. `create_user` still enforces uniqueness.
        match db.fetch_user(&email) {
            Ok(_) => return Err(DbError::UserAlreadyExists(email).into()),
            Err(err) if err.kind() == DbErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let password = HashedPassword::generate(&request.password)?;
        let user = db.create_user(&CreateUser {
            email,
            password: password.into_phc_string(),
            name: request.name,
            age: request.age,
        })?;

        Ok(user)
    })
    .await?;

    Ok(Created(user.into()))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{email}", rejection(ServerError))]
struct UserPath {
    email: UserEmail,
}

async fn get_user(
    UserPath { email }: UserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<UserProfile>> {
    let user = with_db(db, move |db| Ok(db.fetch_user(&email)?)).await?;

    Ok(Json(user.into()))
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    password: String,
    name: String,
    age: i64,
}

/// The path email is both the lookup key and the stored key, so this never renames.
async fn update_user(
    UserPath { email }: UserPath,
    State(db): State<Arc<DbClient>>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>> {
    let user = with_db(db, move |db| {
        let password = HashedPassword::generate(&request.password)?;
        let update = UpdateUser {
            email: email.clone(),
            password: password.into_phc_string(),
            name: request.name,
            age: request.age,
        };

        Ok(db.update_user(&email, &update)?)
    })
    .await?;

    Ok(Json(user.into()))
}

async fn delete_user(
    UserPath { email }: UserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Empty>> {
    with_db(db, move |db| Ok(db.delete_user(&email)?)).await?;

    Ok(Json(Empty {}))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{email}/posts", rejection(ServerError))]
struct UserPostsPath {
    email: UserEmail,
}

async fn get_user_posts(
    UserPostsPath { email }: UserPostsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Post>>> {
    let posts = with_db(db, move |db| Ok(db.fetch_user_posts(&email)?)).await?;

    Ok(Json(posts))
}
