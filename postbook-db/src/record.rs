//! On-disk layout of the store: one JSON object holding both collections.

use postbook_common::model::{
    Id,
    post::{Post, PostMarker},
    user::{User, UserEmail},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum DbDataError {
    #[error("User stored under {key} has email {email}")]
    UserKeyMismatch { key: UserEmail, email: UserEmail },
    #[error("Post stored under {key} has id {id}")]
    PostKeyMismatch { key: Id<PostMarker>, id: Id<PostMarker> },
}

/// The whole persisted state. Both maps are required when parsing.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Document {
    pub users: HashMap<UserEmail, User>,
    pub posts: HashMap<Id<PostMarker>, Post>,
}

impl Document {
    /// Checks that every record sits under its own key.
    pub fn validate(&self) -> Result<(), DbDataError> {
        if let Some((key, user)) = self.users.iter().find(|(key, user)| **key != user.email) {
            return Err(DbDataError::UserKeyMismatch {
                key: key.clone(),
                email: user.email.clone(),
            });
        }

        if let Some((key, post)) = self.posts.iter().find(|(key, post)| **key != post.id) {
            return Err(DbDataError::PostKeyMismatch {
                key: *key,
                id: post.id,
            });
        }

        Ok(())
    }

    /// A post id not currently present in the document.
    #[must_use]
    pub fn fresh_post_id(&self) -> Id<PostMarker> {
        loop {
            let id = Id::generate();
            if !self.posts.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{DbDataError, Document};

    const GO_STORE: &str = r#"{
        "users": {
            "a@x.com": {
                "createdAt": "2023-01-15T08:04:05.123456789Z",
                "email": "a@x.com",
                "password": "pw",
                "name": "Ann",
                "age": 30
            }
        },
        "posts": {
            "0b6f6a36-44a4-4a4b-8a0e-9c5f0f3a2d11": {
                "id": "0b6f6a36-44a4-4a4b-8a0e-9c5f0f3a2d11",
                "createdAt": "2023-01-15T08:05:00Z",
                "userEmail": "a@x.com",
                "text": "hello"
            }
        }
    }"#;

    #[test]
    fn parses_existing_layout() {
        let document: Document = serde_json::from_str(GO_STORE).unwrap();
        document.validate().unwrap();

        assert_eq!(document.users.len(), 1);
        assert_eq!(document.posts.len(), 1);
        let post = document.posts.values().next().unwrap();
        assert_eq!(post.user_email.get(), "a@x.com");
        assert_eq!(post.text, "hello");
    }

    #[test]
    fn empty_document() {
        let json = serde_json::to_string(&Document::default()).unwrap();
        assert_eq!(json, r#"{"users":{},"posts":{}}"#);
    }

    #[test]
    fn both_maps_required() {
        assert!(serde_json::from_str::<Document>(r#"{"users":{}}"#).is_err());
        assert!(serde_json::from_str::<Document>(r#"{"posts":{}}"#).is_err());
    }

    #[test]
    fn key_mismatch() {
        let mismatched = GO_STORE.replacen("\"a@x.com\": {", "\"b@x.com\": {", 1);
        let document: Document = serde_json::from_str(&mismatched).unwrap();
        assert!(matches!(
            document.validate(),
            Err(DbDataError::UserKeyMismatch { .. })
        ));

        let mismatched = GO_STORE.replacen(
            "\"0b6f6a36-44a4-4a4b-8a0e-9c5f0f3a2d11\": {",
            "\"5d1b3f0e-7c2a-4e9b-b1d4-6a8c2e0f9b77\": {",
            1,
        );
        let document: Document = serde_json::from_str(&mismatched).unwrap();
        assert!(matches!(
            document.validate(),
            Err(DbDataError::PostKeyMismatch { .. })
        ));
    }

    #[test]
    fn fresh_post_id_is_unused() {
        let document: Document = serde_json::from_str(GO_STORE).unwrap();
        let id = document.fresh_post_id();
        assert!(!document.posts.contains_key(&id));
    }
}
