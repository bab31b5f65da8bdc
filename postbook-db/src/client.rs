use crate::record::{DbDataError, Document};
use postbook_common::model::{
    Id,
    post::{CreatePost, Post, PostMarker},
    user::{CreateUser, UpdateUser, User, UserEmail},
};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("User with email {0} was not found.")]
    UserNotFound(UserEmail),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("User with email {0} already exists.")]
    UserAlreadyExists(UserEmail),
    #[error("Store at {} is not a valid document: {source}", path.display())]
    Unparseable {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Store at {} had an invalid entry: {source}", path.display())]
    InvalidEntry { path: PathBuf, source: DbDataError },
    #[error("Could not access store at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Coarse classification of [`DbError`], for callers that map errors onto a transport.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum DbErrorKind {
    NotFound,
    AlreadyExists,
    /// The document exists but could not be understood.
    CorruptStore,
    Io,
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            DbError::UserNotFound(_) | DbError::PostNotFound(_) => DbErrorKind::NotFound,
            DbError::UserAlreadyExists(_) => DbErrorKind::AlreadyExists,
            DbError::Unparseable { .. } | DbError::InvalidEntry { .. } => {
                DbErrorKind::CorruptStore
            }
            DbError::Io { .. } => DbErrorKind::Io,
        }
    }
}

/// Record store backed by a single JSON file.
///
/// Every call loads the whole document, works on it in memory and, for mutations,
/// replaces the file with the new document. Nothing is cached between calls.
///
/// Calls through one client are serialized. Two clients (or processes) on the same
/// path are not coordinated and the later write wins.
#[derive(Debug)]
pub struct DbClient {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DbClient {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty store if none exists, otherwise checks the existing one parses.
    pub fn ensure_store(&self) -> Result<()> {
        let _guard = self.lock();

        match fs::read(&self.path) {
            Ok(data) => {
                self.parse_document(&data)?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.write_document(&Document::default())?;
                info!(path = %self.path.display(), "Created empty store");
                self.load_document()?;
            }
            Err(err) => return Err(self.io_error(err)),
        }

        Ok(())
    }

    pub fn create_user(&self, user: &CreateUser) -> Result<User> {
        self.modify(|document| {
            if document.users.contains_key(&user.email) {
                return Err(DbError::UserAlreadyExists(user.email.clone()));
            }

            let user = User {
                created_at: OffsetDateTime::now_utc(),
                email: user.email.clone(),
                password: user.password.clone(),
                name: user.name.clone(),
                age: user.age,
            };
            document.users.insert(user.email.clone(), user.clone());

            debug!(email = %user.email, "Created user");
            Ok(user)
        })
    }

    /// Replaces password, name and age of the user stored under `email`.
    ///
    /// If `update.email` differs from `email` the user moves to the new key, keeping
    /// its creation time. Moving onto a key held by another user fails.
    pub fn update_user(&self, email: &UserEmail, update: &UpdateUser) -> Result<User> {
        self.modify(|document| {
            if !document.users.contains_key(email) {
                return Err(DbError::UserNotFound(email.clone()));
            }

            let renamed = update.email != *email;
            if renamed && document.users.contains_key(&update.email) {
                return Err(DbError::UserAlreadyExists(update.email.clone()));
            }

            let mut user = document
                .users
                .remove(email)
                .ok_or_else(|| DbError::UserNotFound(email.clone()))?;

            user.email = update.email.clone();
            user.password = update.password.clone();
            user.name = update.name.clone();
            user.age = update.age;
            document.users.insert(user.email.clone(), user.clone());

            if renamed {
                debug!(from = %email, to = %user.email, "Renamed user");
            } else {
                debug!(email = %user.email, "Updated user");
            }
            Ok(user)
        })
    }

    pub fn fetch_user(&self, email: &UserEmail) -> Result<User> {
        self.read(|mut document| {
            document
                .users
                .remove(email)
                .ok_or_else(|| DbError::UserNotFound(email.clone()))
        })
    }

    /// Removes the user. Their posts stay in place.
    pub fn delete_user(&self, email: &UserEmail) -> Result<()> {
        self.modify(|document| {
            document
                .users
                .remove(email)
                .ok_or_else(|| DbError::UserNotFound(email.clone()))?;

            debug!(%email, "Deleted user");
            Ok(())
        })
    }

    /// Creates a post after checking its author exists at this moment.
    pub fn create_post(&self, post: &CreatePost) -> Result<Post> {
        self.modify(|document| {
            if !document.users.contains_key(&post.user_email) {
                return Err(DbError::UserNotFound(post.user_email.clone()));
            }

            let post = Post {
                id: document.fresh_post_id(),
                created_at: OffsetDateTime::now_utc(),
                user_email: post.user_email.clone(),
                text: post.text.clone(),
            };
            document.posts.insert(post.id, post.clone());

            debug!(id = %post.id, user_email = %post.user_email, "Created post");
            Ok(post)
        })
    }

    pub fn fetch_post(&self, id: Id<PostMarker>) -> Result<Post> {
        self.read(|mut document| {
            document
                .posts
                .remove(&id)
                .ok_or(DbError::PostNotFound(id))
        })
    }

    /// All posts naming `user_email` as author, in no particular order.
    ///
    /// Unknown users simply have no posts. This scans every post.
    pub fn fetch_user_posts(&self, user_email: &UserEmail) -> Result<Vec<Post>> {
        self.read(|document| {
            let posts = document
                .posts
                .into_values()
                .filter(|post| post.user_email == *user_email)
                .collect();

            Ok(posts)
        })
    }

    pub fn delete_post(&self, id: Id<PostMarker>) -> Result<()> {
        self.modify(|document| {
            document
                .posts
                .remove(&id)
                .ok_or(DbError::PostNotFound(id))?;

            debug!(%id, "Deleted post");
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a panic elsewhere cannot leave it inconsistent.
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(Document) -> Result<T>) -> Result<T> {
        let _guard = self.lock();
        f(self.load_document()?)
    }

    /// Load, mutate, write. Nothing is written if `f` fails.
    fn modify<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let _guard = self.lock();
        let mut document = self.load_document()?;
        let output = f(&mut document)?;
        self.write_document(&document)?;
        Ok(output)
    }

    fn load_document(&self) -> Result<Document> {
        let data = fs::read(&self.path).map_err(|err| self.io_error(err))?;
        self.parse_document(&data)
    }

    fn parse_document(&self, data: &[u8]) -> Result<Document> {
        let document: Document =
            serde_json::from_slice(data).map_err(|source| DbError::Unparseable {
                path: self.path.clone(),
                source,
            })?;

        document.validate().map_err(|source| DbError::InvalidEntry {
            path: self.path.clone(),
            source,
        })?;

        Ok(document)
    }

    /// Writes to a sibling temporary file and renames it over the store, so readers
    /// see either the old or the new document.
    fn write_document(&self, document: &Document) -> Result<()> {
        let data = serde_json::to_vec(document).map_err(|err| self.io_error(err.into()))?;

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(directory).map_err(|err| self.io_error(err))?;
        file.write_all(&data).map_err(|err| self.io_error(err))?;
        file.as_file()
            .sync_all()
            .map_err(|err| self.io_error(err))?;
        file.persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;

        Ok(())
    }

    fn io_error(&self, source: io::Error) -> DbError {
        DbError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
