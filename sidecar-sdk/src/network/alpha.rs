/// Player tracking endpoints (`/alpha/player/...`) of the sidecar REST gateway
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::http_client::LifecycleClient;
use crate::error::Result;
use crate::types::{lenient_i64, null_as_default};

#[derive(Debug, Serialize)]
struct PlayerId<'a> {
    #[serde(rename = "playerID")]
    player_id: &'a str,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Count {
    #[serde(deserialize_with = "lenient_i64")]
    count: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BoolValue {
    #[serde(rename = "bool")]
    value: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayerList {
    #[serde(deserialize_with = "null_as_default")]
    list: Vec<String>,
}

/// Alpha player tracking
///
/// Connect and disconnect change sidecar state relative to the current value, so they are
/// sent once and never retried.
#[derive(Debug, Clone)]
pub struct Alpha {
    client: LifecycleClient,
}

impl Alpha {
    pub fn new(client: LifecycleClient) -> Self {
        Self { client }
    }

    /// Record a player connection; false when the id was already connected
    pub async fn player_connect(&self, player_id: &str) -> Result<bool> {
        self.toggle("alpha/player/connect", player_id).await
    }

    /// Record a player disconnection; false when the id was not connected
    pub async fn player_disconnect(&self, player_id: &str) -> Result<bool> {
        self.toggle("alpha/player/disconnect", player_id).await
    }

    pub async fn set_player_capacity(&self, capacity: i64) -> Result<()> {
        let body = Count { count: capacity };
        self.client
            .send(Method::PUT, "alpha/player/capacity", Some(&body), true)
            .await
            .map(drop)
    }

    pub async fn get_player_capacity(&self) -> Result<i64> {
        let capacity: Count = self.client.fetch("alpha/player/capacity").await?;
        Ok(capacity.count)
    }

    pub async fn get_player_count(&self) -> Result<i64> {
        let count: Count = self.client.fetch("alpha/player/count").await?;
        Ok(count.count)
    }

    pub async fn is_player_connected(&self, player_id: &str) -> Result<bool> {
        let path = format!("alpha/player/connected/{}", player_id);
        let connected: BoolValue = self.client.fetch(&path).await?;
        Ok(connected.value)
    }

    pub async fn get_connected_players(&self) -> Result<Vec<String>> {
        let players: PlayerList = self.client.fetch("alpha/player/connected").await?;
        Ok(players.list)
    }

    async fn toggle(&self, path: &str, player_id: &str) -> Result<bool> {
        let body = self
            .client
            .send(Method::POST, path, Some(&PlayerId { player_id }), false)
            .await?;
        let changed: BoolValue = serde_json::from_slice(&body)?;
        Ok(changed.value)
    }
}
