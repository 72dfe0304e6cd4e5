/// Counter and list endpoints (`/v1beta1/...`) of the sidecar REST gateway
use reqwest::Method;
use serde::Serialize;

use super::http_client::LifecycleClient;
use crate::error::{Result, SdkError};
use crate::types::{Counter, List};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum CounterUpdate {
    CountDiff(i64),
    Count(i64),
    Capacity(i64),
}

#[derive(Debug, Serialize)]
struct ListCapacity {
    capacity: i64,
}

#[derive(Debug, Serialize)]
struct ListValue<'a> {
    value: &'a str,
}

/// Beta counters and lists
///
/// Keys must be declared on the GameServer resource; the sidecar answers unknown keys with
/// an error status. Relative updates (increment, decrement, append, delete) are sent once
/// and never retried.
#[derive(Debug, Clone)]
pub struct Beta {
    client: LifecycleClient,
}

impl Beta {
    pub fn new(client: LifecycleClient) -> Self {
        Self { client }
    }

    pub async fn get_counter(&self, key: &str) -> Result<Counter> {
        self.client.fetch(&counter_path(key)).await
    }

    pub async fn get_counter_count(&self, key: &str) -> Result<i64> {
        Ok(self.get_counter(key).await?.count)
    }

    pub async fn get_counter_capacity(&self, key: &str) -> Result<i64> {
        Ok(self.get_counter(key).await?.capacity)
    }

    /// Raise the count by `amount`; fails once the count would pass the capacity
    pub async fn increment_counter(&self, key: &str, amount: i64) -> Result<()> {
        let amount = non_negative("increment", amount)?;
        self.update_counter(key, CounterUpdate::CountDiff(amount), false)
            .await
    }

    /// Lower the count by `amount`; fails once the count would drop below zero
    pub async fn decrement_counter(&self, key: &str, amount: i64) -> Result<()> {
        let amount = non_negative("decrement", amount)?;
        self.update_counter(key, CounterUpdate::CountDiff(-amount), false)
            .await
    }

    pub async fn set_counter_count(&self, key: &str, count: i64) -> Result<()> {
        self.update_counter(key, CounterUpdate::Count(count), true)
            .await
    }

    /// Zero means unbounded
    pub async fn set_counter_capacity(&self, key: &str, capacity: i64) -> Result<()> {
        self.update_counter(key, CounterUpdate::Capacity(capacity), true)
            .await
    }

    pub async fn get_list(&self, key: &str) -> Result<List> {
        self.client.fetch(&list_path(key)).await
    }

    pub async fn get_list_capacity(&self, key: &str) -> Result<i64> {
        Ok(self.get_list(key).await?.capacity)
    }

    /// Capacity must be between 0 and 1000
    pub async fn set_list_capacity(&self, key: &str, capacity: i64) -> Result<()> {
        self.client
            .send(Method::PATCH, &list_path(key), Some(&ListCapacity { capacity }), true)
            .await
            .map(drop)
    }

    pub async fn list_contains(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.get_list(key).await?.values.iter().any(|v| v == value))
    }

    pub async fn get_list_length(&self, key: &str) -> Result<usize> {
        Ok(self.get_list(key).await?.values.len())
    }

    pub async fn get_list_values(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.get_list(key).await?.values)
    }

    /// Append a value; fails when it is already present or the list is full
    pub async fn append_list_value(&self, key: &str, value: &str) -> Result<()> {
        let path = format!("{}:addValue", list_path(key));
        self.client
            .send(Method::POST, &path, Some(&ListValue { value }), false)
            .await
            .map(drop)
    }

    /// Remove a value; fails when it is not present
    pub async fn delete_list_value(&self, key: &str, value: &str) -> Result<()> {
        let path = format!("{}:removeValue", list_path(key));
        self.client
            .send(Method::POST, &path, Some(&ListValue { value }), false)
            .await
            .map(drop)
    }

    async fn update_counter(&self, key: &str, update: CounterUpdate, retry: bool) -> Result<()> {
        self.client
            .send(Method::PATCH, &counter_path(key), Some(&update), retry)
            .await
            .map(drop)
    }
}

fn counter_path(key: &str) -> String {
    format!("v1beta1/counters/{}", key)
}

fn list_path(key: &str) -> String {
    format!("v1beta1/lists/{}", key)
}

fn non_negative(operation: &str, amount: i64) -> Result<i64> {
    if amount < 0 {
        return Err(SdkError::InvalidArgument(format!(
            "{} amount must not be negative, got {}",
            operation, amount
        )));
    }
    Ok(amount)
}
