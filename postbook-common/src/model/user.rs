use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use time::OffsetDateTime;

/// Longest forward-path an SMTP server has to accept.
pub const USER_EMAIL_MAX_LEN: usize = 254;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub email: UserEmail,
    pub password: String,
    pub name: String,
    pub age: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateUser {
    pub email: UserEmail,
    pub password: String,
    pub name: String,
    pub age: i64,
}

/// Replacement values for a stored user.
///
/// `email` is the key the user is stored under afterwards. It normally equals the
/// lookup key; a different value renames the user.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UpdateUser {
    pub email: UserEmail,
    pub password: String,
    pub name: String,
    pub age: i64,
}

/// A user as shown to clients, without the password.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub email: UserEmail,
    pub name: String,
    pub age: i64,
}

impl From<User> for UserProfile {
    fn from(value: User) -> Self {
        Self {
            created_at: value.created_at,
            email: value.email,
            name: value.name,
            age: value.age,
        }
    }
}

/// Key of a stored user. Any string, compared case-sensitively.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    #[must_use]
    pub fn new(email: String) -> Self {
        Self(email)
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<String> for UserEmail {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for UserEmail {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

/// An email accepted for a new user: non-empty and at most [`USER_EMAIL_MAX_LEN`]
/// characters.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct NewUserEmail(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The user email is invalid: {0:?}")]
pub struct InvalidUserEmailError(String);

impl NewUserEmail {
    pub fn new(email: String) -> Result<Self, InvalidUserEmailError> {
        if !email.is_empty() && email.chars().count() <= USER_EMAIL_MAX_LEN {
            Ok(NewUserEmail(email))
        } else {
            Err(InvalidUserEmailError(email))
        }
    }
}

impl From<NewUserEmail> for UserEmail {
    fn from(value: NewUserEmail) -> Self {
        UserEmail(value.0)
    }
}

impl<'de> Deserialize<'de> for NewUserEmail {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        NewUserEmail::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"NewUserEmail"))
    }
}
