//! In-memory actor directory
//!
//! Stands in for user and key persistence. Lookups are case-insensitive.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::models::{Actor, KeyMaterial};
use crate::error::AppError;

/// Thread-safe registry of local actors
#[derive(Default)]
pub struct ActorDirectory {
    actors: RwLock<HashMap<String, Arc<Actor>>>,
}

impl ActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an actor by username
    pub async fn get(&self, username: &str) -> Option<Arc<Actor>> {
        let actors = self.actors.read().await;
        actors.get(&username.to_ascii_lowercase()).cloned()
    }

    /// Insert or replace an actor
    pub async fn insert(&self, actor: Actor) -> Arc<Actor> {
        let actor = Arc::new(actor);
        let mut actors = self.actors.write().await;
        actors.insert(actor.username.to_ascii_lowercase(), actor.clone());
        actor
    }

    /// Return the existing actor or create one with a fresh key pair
    pub async fn get_or_create(&self, username: &str, key_bits: usize) -> Result<Arc<Actor>, AppError> {
        if let Some(actor) = self.get(username).await {
            return Ok(actor);
        }

        let keys = tokio::task::spawn_blocking(move || KeyMaterial::generate(key_bits))
            .await
            .map_err(|e| AppError::Internal(e.into()))??;

        let actor = self.insert(Actor::new(username, keys)).await;
        tracing::info!(username = %actor.username, "Actor created");
        Ok(actor)
    }

    pub async fn len(&self) -> usize {
        self.actors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actors.read().await.is_empty()
    }
}
