//! Protobuf messages of the `agones.dev.sdk` package used by the watch stream
//!
//! Only the messages reachable from `SDK/WatchGameServer` are declared.

use std::collections::HashMap;

/// Empty request message
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

/// GameServer as pushed by the sidecar
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GameServer {
    #[prost(message, optional, tag = "1")]
    pub object_meta: Option<game_server::ObjectMeta>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<game_server::Spec>,
    #[prost(message, optional, tag = "3")]
    pub status: Option<game_server::Status>,
}

/// Nested messages of [`GameServer`]
pub mod game_server {
    use super::HashMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ObjectMeta {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub namespace: String,
        #[prost(string, tag = "3")]
        pub uid: String,
        #[prost(string, tag = "4")]
        pub resource_version: String,
        #[prost(int64, tag = "5")]
        pub generation: i64,
        #[prost(int64, tag = "6")]
        pub creation_timestamp: i64,
        #[prost(int64, tag = "7")]
        pub deletion_timestamp: i64,
        #[prost(map = "string, string", tag = "8")]
        pub annotations: HashMap<String, String>,
        #[prost(map = "string, string", tag = "9")]
        pub labels: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Spec {
        #[prost(message, optional, tag = "1")]
        pub health: Option<spec::Health>,
    }

    pub mod spec {
        #[derive(Clone, Copy, PartialEq, ::prost::Message)]
        pub struct Health {
            #[prost(bool, tag = "1")]
            pub disabled: bool,
            #[prost(int32, tag = "2")]
            pub period_seconds: i32,
            #[prost(int32, tag = "3")]
            pub failure_threshold: i32,
            #[prost(int32, tag = "4")]
            pub initial_delay_seconds: i32,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Status {
        #[prost(string, tag = "1")]
        pub state: String,
        #[prost(string, tag = "2")]
        pub address: String,
        #[prost(message, repeated, tag = "3")]
        pub ports: Vec<status::Port>,
        #[prost(message, repeated, tag = "7")]
        pub addresses: Vec<status::Address>,
    }

    pub mod status {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Port {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(int32, tag = "2")]
            pub port: i32,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Address {
            #[prost(string, tag = "1")]
            pub r#type: String,
            #[prost(string, tag = "2")]
            pub address: String,
        }
    }
}
