//! Typed request/response shapes for the admin HTTP surface `ClusterInfo`
//! consumes. This crate never serves these; it only deserializes
//! responses shaped like them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub broadcast_address: String,
    pub hostname: String,
    pub http_port: u16,
    pub tcp_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TopicsResponse {
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ChannelsResponse {
    pub channels: Vec<String>,
}

/// One broker/node as seen in `/nodes` or `/lookup` responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProducerInfo {
    pub broadcast_address: String,
    pub hostname: String,
    pub tcp_port: u16,
    pub http_port: u16,
    pub version: String,
    /// Computed by the aggregator's producer-union rule, not part of
    /// the wire shape; defaults to `false` on deserialize.
    #[serde(default)]
    pub out_of_date: bool,
}

impl ProducerInfo {
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.broadcast_address, self.http_port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodesResponse {
    pub producers: Vec<ProducerInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LookupResponse {
    pub producers: Vec<ProducerInfo>,
    #[serde(default)]
    pub partitions: HashMap<String, ProducerInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeInfo {
    pub broadcast_address: String,
    pub http_port: u16,
    pub tcp_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListLookupResponse {
    pub leader_node: NodeInfo,
    pub all_nodes: Vec<NodeInfo>,
}

/// The merged result of a `/lookup` fan-out: the topic's producers,
/// plus per-partition producers grouped by partition id and deduped
/// within each group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicProducers {
    pub producers: Vec<ProducerInfo>,
    pub partitions: std::collections::BTreeMap<String, Vec<ProducerInfo>>,
}
