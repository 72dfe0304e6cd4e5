//! GameServer snapshot model
//!
//! A [`GameServer`] is an immutable view of the sidecar's state at one point in time. The
//! watch channel builds a fresh one for every decoded push message, either from the JSON
//! envelope of the HTTP/WebSocket transports or from the protobuf message of the gRPC stream.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::network::proto;

/// Current view of the game server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameServer {
    #[serde(alias = "objectMeta")]
    pub object_meta: Option<ObjectMeta>,
    pub spec: Option<Spec>,
    pub status: Option<Status>,
}

impl GameServer {
    /// Object name, empty when metadata is absent
    pub fn name(&self) -> &str {
        self.object_meta
            .as_ref()
            .map(|meta| meta.name.as_str())
            .unwrap_or_default()
    }

    /// Lifecycle state (`Scheduled`, `Ready`, `Allocated`...), empty when status is absent
    pub fn state(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.state.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    #[serde(alias = "resourceVersion")]
    pub resource_version: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub generation: i64,
    #[serde(alias = "creationTimestamp", deserialize_with = "lenient_i64")]
    pub creation_timestamp: i64,
    #[serde(alias = "deletionTimestamp", deserialize_with = "lenient_i64")]
    pub deletion_timestamp: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub annotations: HashMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Spec {
    pub health: Option<Health>,
}

/// Health-check policy of the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Health {
    pub disabled: bool,
    #[serde(alias = "periodSeconds")]
    pub period_seconds: i32,
    #[serde(alias = "failureThreshold")]
    pub failure_threshold: i32,
    #[serde(alias = "initialDelaySeconds")]
    pub initial_delay_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub state: String,
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ports: Vec<Port>,
    /// Typed addresses, absent on older sidecars
    pub addresses: Option<Vec<Address>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    pub name: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    /// Address type such as `InternalIP`, `ExternalDNS` or `PodIP`
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: String,
}

/// Player-defined counter tracked by the sidecar
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Counter {
    pub name: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub count: i64,
    /// Zero means unbounded
    #[serde(deserialize_with = "lenient_i64")]
    pub capacity: i64,
}

/// Player-defined list of unique values tracked by the sidecar
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct List {
    pub name: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub capacity: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub values: Vec<String>,
}

/// int64 fields arrive as decimal strings from the REST gateway, as numbers elsewhere
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(0),
        Some(NumberOrString::Number(n)) => Ok(n),
        Some(NumberOrString::String(s)) if s.is_empty() => Ok(0),
        Some(NumberOrString::String(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<proto::GameServer> for GameServer {
    fn from(msg: proto::GameServer) -> Self {
        Self {
            object_meta: msg.object_meta.map(ObjectMeta::from),
            spec: msg.spec.map(Spec::from),
            status: msg.status.map(Status::from),
        }
    }
}

impl From<proto::game_server::ObjectMeta> for ObjectMeta {
    fn from(msg: proto::game_server::ObjectMeta) -> Self {
        Self {
            name: msg.name,
            namespace: msg.namespace,
            uid: msg.uid,
            resource_version: msg.resource_version,
            generation: msg.generation,
            creation_timestamp: msg.creation_timestamp,
            deletion_timestamp: msg.deletion_timestamp,
            annotations: msg.annotations,
            labels: msg.labels,
        }
    }
}

impl From<proto::game_server::Spec> for Spec {
    fn from(msg: proto::game_server::Spec) -> Self {
        Self {
            health: msg.health.map(|health| Health {
                disabled: health.disabled,
                period_seconds: health.period_seconds,
                failure_threshold: health.failure_threshold,
                initial_delay_seconds: health.initial_delay_seconds,
            }),
        }
    }
}

impl From<proto::game_server::Status> for Status {
    fn from(msg: proto::game_server::Status) -> Self {
        // proto3 cannot tell an empty list from a missing one
        let addresses = if msg.addresses.is_empty() {
            None
        } else {
            Some(
                msg.addresses
                    .into_iter()
                    .map(|a| Address {
                        address_type: a.r#type,
                        address: a.address,
                    })
                    .collect(),
            )
        };
        Self {
            state: msg.state,
            address: msg.address,
            ports: msg
                .ports
                .into_iter()
                .map(|p| Port {
                    name: p.name,
                    port: p.port,
                })
                .collect(),
            addresses,
        }
    }
}
