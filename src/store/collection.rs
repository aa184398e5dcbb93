use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

use crate::domain::Game;
use crate::models::{Accounts, Drawings, Leaderboard};

/// Anything that can be stored as one whole JSON document.
pub trait Collection: Serialize + DeserializeOwned + Default + Send + 'static {}

impl<T> Collection for T where T: Serialize + DeserializeOwned + Default + Send + 'static {}

/// Names a collection file and fixes the type stored in it.
pub struct CollectionKey<C> {
    name: String,
    _marker: PhantomData<fn() -> C>,
}

impl<C> CollectionKey<C> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C> Clone for CollectionKey<C> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<C> fmt::Debug for CollectionKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CollectionKey").field(&self.name).finish()
    }
}

impl<C> fmt::Display for CollectionKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[must_use]
pub fn users() -> CollectionKey<Accounts> {
    CollectionKey::new("users")
}

#[must_use]
pub fn drawings() -> CollectionKey<Drawings> {
    CollectionKey::new("drawings")
}

#[must_use]
pub fn leaderboard(game: Game) -> CollectionKey<Leaderboard> {
    CollectionKey::new(format!("leaderboard_{game}"))
}
