pub mod auth;
pub mod post;
pub mod user;

use crate::model::user::InvalidUserEmailError;
use derive_where::derive_where;
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
    str::FromStr,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserEmail(#[from] InvalidUserEmailError),
    #[error("The id is not a valid UUID: {0}")]
    Id(#[from] uuid::Error),
}

/// A 128-bit random identifier, typed by the kind of record it names.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<Marker>(Uuid, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    /// Draws a fresh version 4 id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(uuid::Builder::from_random_bytes(rand::random()).into_uuid())
    }

    #[must_use]
    pub fn uuid(self) -> Uuid {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0.hyphenated(), f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = ModelValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(Uuid::parse_str(s)?))
    }
}
