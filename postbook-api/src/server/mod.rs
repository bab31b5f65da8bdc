use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use json::Json;
use postbook_common::model::auth::PasswordHashError;
use postbook_db::client::{DbClient, DbError, DbErrorKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

mod json;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

/// Runs blocking store work off the async executor.
pub async fn with_db<T, F>(db: Arc<DbClient>, f: F) -> Result<T>
where
    F: FnOnce(&DbClient) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&db)).await?
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error("Blocking task failed: {0}")]
    Blocking(#[from] JoinError),
    #[error(transparent)]
    Database(#[from] DbError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_) | ServerError::PathRejection(_) => StatusCode::NOT_FOUND,
            ServerError::JsonRejection(_) => StatusCode::BAD_REQUEST,
            ServerError::Database(err) => match err.kind() {
                DbErrorKind::NotFound => StatusCode::NOT_FOUND,
                DbErrorKind::AlreadyExists => StatusCode::CONFLICT,
                DbErrorKind::CorruptStore | DbErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::JsonResponse(_)
            | ServerError::PasswordHash(_)
            | ServerError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let error_response = ErrorResponse {
            status: status.as_u16(),
            error: self.to_string(),
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{ErrorResponse, ServerState, routes};
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use postbook_common::model::{
        auth::HashedPassword,
        post::Post,
        user::{UserEmail, UserProfile},
    };
    use postbook_db::client::DbClient;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use std::{fs, sync::Arc};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        _dir: TempDir,
        db: Arc<DbClient>,
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(DbClient::new(dir.path().join("db.json")));
            db.ensure_store().unwrap();

            let router = routes().with_state(ServerState {
                db_client: Arc::clone(&db),
            });

            Self {
                _dir: dir,
                db,
                router,
            }
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => builder.body(Body::empty()),
            }
            .unwrap();

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };

            (status, value)
        }

        async fn create_ann(&self) {
            let (status, _) = self
                .send(
                    Method::POST,
                    "/users",
                    Some(json!({ "email": "a@x.com", "password": "pw", "name": "Ann", "age": 30 })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    fn parse<T: DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn create_and_get_user() {
        let app = TestApp::new();

        let (status, body) = app
            .send(
                Method::POST,
                "/users",
                Some(json!({ "email": "a@x.com", "password": "pw", "name": "Ann", "age": 30 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.get("password").is_none());
        let created: UserProfile = parse(body);
        assert_eq!(created.email.get(), "a@x.com");
        assert_eq!(created.name, "Ann");
        assert_eq!(created.age, 30);

        let (status, body) = app.send(Method::GET, "/users/a@x.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<UserProfile>(body), created);
    }

    #[tokio::test]
    async fn stored_password_is_hashed() {
        let app = TestApp::new();
        app.create_ann().await;

        let stored = app
            .db
            .fetch_user(&UserEmail::from("a@x.com"))
            .unwrap();
        assert_ne!(stored.password, "pw");
        let hash = HashedPassword::from_phc_string(stored.password);
        assert!(hash.verify("pw").unwrap());

        let contents = fs::read_to_string(app.db.path()).unwrap();
        assert!(!contents.contains("\"pw\""));
    }

    #[tokio::test]
    async fn duplicate_user_conflicts() {
        let app = TestApp::new();
        app.create_ann().await;

        let (status, body) = app
            .send(
                Method::POST,
                "/users",
                Some(json!({ "email": "a@x.com", "password": "other", "name": "Other", "age": 1 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorResponse = parse(body);
        assert_eq!(error.status, 409);
        assert!(error.error.contains("a@x.com"));

        let stored = app.db.fetch_user(&UserEmail::from("a@x.com")).unwrap();
        assert_eq!(stored.name, "Ann");
        assert!(HashedPassword::from_phc_string(stored.password).verify("pw").unwrap());
    }

    #[tokio::test]
    async fn update_user() {
        let app = TestApp::new();
        app.create_ann().await;
        let (_, before) = app.send(Method::GET, "/users/a@x.com", None).await;
        let before: UserProfile = parse(before);

        let (status, body) = app
            .send(
                Method::PUT,
                "/users/a@x.com",
                Some(json!({ "password": "new", "name": "Anne", "age": 31 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let updated: UserProfile = parse(body);
        assert_eq!(updated.name, "Anne");
        assert_eq!(updated.age, 31);
        assert_eq!(updated.created_at, before.created_at);

        let (status, _) = app
            .send(
                Method::PUT,
                "/users/b@x.com",
                Some(json!({ "password": "new", "name": "Bob", "age": 31 })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_user() {
        let app = TestApp::new();
        app.create_ann().await;

        let (status, body) = app.send(Method::DELETE, "/users/a@x.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, _) = app.send(Method::GET, "/users/a@x.com", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.send(Method::DELETE, "/users/a@x.com", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_lifecycle() {
        let app = TestApp::new();
        app.create_ann().await;

        let (status, body) = app
            .send(
                Method::POST,
                "/posts",
                Some(json!({ "userEmail": "a@x.com", "text": "hello" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let post: Post = parse(body);
        assert_eq!(post.user_email.get(), "a@x.com");
        assert_eq!(post.text, "hello");

        let post_uri = format!("/posts/{}", post.id);
        let (status, body) = app.send(Method::GET, &post_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Post>(body), post);

        let (status, body) = app.send(Method::GET, "/users/a@x.com/posts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Vec<Post>>(body), vec![post.clone()]);

        let (status, _) = app.send(Method::DELETE, &post_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.send(Method::GET, &post_uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_for_unknown_user() {
        let app = TestApp::new();

        let (status, _) = app
            .send(
                Method::POST,
                "/posts",
                Some(json!({ "userEmail": "a@x.com", "text": "hello" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn posts_outlive_their_author() {
        let app = TestApp::new();
        app.create_ann().await;
        let (_, body) = app
            .send(
                Method::POST,
                "/posts",
                Some(json!({ "userEmail": "a@x.com", "text": "hello" })),
            )
            .await;
        let post: Post = parse(body);

        app.send(Method::DELETE, "/users/a@x.com", None).await;

        let (status, body) = app.send(Method::GET, "/users/a@x.com/posts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Vec<Post>>(body), vec![post]);
    }

    #[tokio::test]
    async fn malformed_requests() {
        let app = TestApp::new();

        let (status, _) = app
            .send(Method::POST, "/users", Some(json!({ "email": "a@x.com" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                Method::POST,
                "/users",
                Some(json!({ "email": "", "password": "pw", "name": "Ann", "age": 30 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.send(Method::GET, "/posts/not-an-id", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app.send(Method::GET, "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parse::<ErrorResponse>(body).status, 404);
    }

    #[tokio::test]
    async fn corrupt_store_is_server_error() {
        let app = TestApp::new();
        fs::write(app.db.path(), "not json").unwrap();

        let (status, _) = app.send(Method::GET, "/users/a@x.com", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
