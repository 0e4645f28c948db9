//! `ClusterInfo`: fans queries out across lookup/broker addresses and
//! merges the results, tolerating partial failure.
//!
//! One `tokio::spawn` task per address, joined with
//! `futures_util::future::join_all` — the join-barrier shape spec's
//! concurrency model calls for fan-out tasks.

use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use serde::de::DeserializeOwned;

use super::data::{self, ProducerInfo, TopicProducers};
use super::error::{Error, Result};
use crate::config::ClusterClientConfig;

/// The result of a fan-out call: the merged value, plus `(address,
/// message)` for every target that failed. `errors` is empty when every
/// target succeeded; non-empty but `Ok` means a partial failure.
#[derive(Debug)]
pub struct Aggregate<T> {
    pub value: T,
    pub errors: Vec<(String, String)>,
}

impl<T> Aggregate<T> {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub struct ClusterInfo {
    client: reqwest::Client,
    config: ClusterClientConfig,
}

impl ClusterInfo {
    pub fn new(config: ClusterClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// For tests: inject a pre-built client (e.g. one pointed at a local
    /// mock server).
    pub fn with_client(client: reqwest::Client, config: ClusterClientConfig) -> Self {
        Self { client, config }
    }

    /// `GET /topics` across `addresses`, union of topic names, sorted
    /// and deduped.
    pub async fn get_lookupd_topics(&self, addresses: &[String]) -> Result<Aggregate<Vec<String>>> {
        let (oks, errs) = self
            .fan_out_json::<data::TopicsResponse>(addresses, "/topics")
            .await;
        if oks.is_empty() && !errs.is_empty() {
            return Err(Error::TotalFailure(errs));
        }
        let mut topics: Vec<String> = oks.into_iter().flat_map(|(_, r)| r.topics).collect();
        topics.sort();
        topics.dedup();
        Ok(Aggregate { value: topics, errors: errs })
    }

    /// `GET /channels?topic=T` across `addresses`, union of channel
    /// names, sorted and deduped.
    pub async fn get_lookupd_channels(&self, addresses: &[String], topic: &str) -> Result<Aggregate<Vec<String>>> {
        let path = format!("/channels?topic={topic}");
        let (oks, errs) = self
            .fan_out_json::<data::ChannelsResponse>(addresses, &path)
            .await;
        if oks.is_empty() && !errs.is_empty() {
            return Err(Error::TotalFailure(errs));
        }
        let mut channels: Vec<String> = oks.into_iter().flat_map(|(_, r)| r.channels).collect();
        channels.sort();
        channels.dedup();
        Ok(Aggregate { value: channels, errors: errs })
    }

    /// `GET /nodes` across `addresses`: dedup by `HTTPAddress`, compute
    /// the max observed version, mark anything below it `out_of_date`.
    pub async fn get_lookupd_producers(&self, addresses: &[String]) -> Result<Aggregate<Vec<ProducerInfo>>> {
        let (oks, errs) = self
            .fan_out_json::<data::NodesResponse>(addresses, "/nodes")
            .await;
        if oks.is_empty() && !errs.is_empty() {
            return Err(Error::TotalFailure(errs));
        }
        let mut by_addr: HashMap<String, ProducerInfo> = HashMap::new();
        for (_, resp) in oks {
            for p in resp.producers {
                by_addr.entry(p.http_address()).or_insert(p);
            }
        }
        let producers = mark_out_of_date(by_addr.into_values().collect());
        Ok(Aggregate { value: producers, errors: errs })
    }

    /// `GET /lookup?topic=T` across `addresses`: producer union plus
    /// per-partition producers, grouped by partition id and deduped
    /// within each group.
    pub async fn get_topic_producers(&self, addresses: &[String], topic: &str) -> Result<Aggregate<TopicProducers>> {
        let path = format!("/lookup?topic={topic}");
        let (oks, errs) = self
            .fan_out_json::<data::LookupResponse>(addresses, &path)
            .await;
        if oks.is_empty() && !errs.is_empty() {
            return Err(Error::TotalFailure(errs));
        }
        let mut producers_by_addr: HashMap<String, ProducerInfo> = HashMap::new();
        let mut partitions: std::collections::BTreeMap<String, HashMap<String, ProducerInfo>> =
            std::collections::BTreeMap::new();
        for (_, resp) in oks {
            for p in resp.producers {
                producers_by_addr.entry(p.http_address()).or_insert(p);
            }
            for (partition_id, p) in resp.partitions {
                partitions
                    .entry(partition_id)
                    .or_default()
                    .entry(p.http_address())
                    .or_insert(p);
            }
        }
        let producers = mark_out_of_date(producers_by_addr.into_values().collect());
        let partitions = partitions
            .into_iter()
            .map(|(partition_id, by_addr)| {
                (partition_id, mark_out_of_date(by_addr.into_values().collect()))
            })
            .collect();
        Ok(Aggregate {
            value: TopicProducers { producers, partitions },
            errors: errs,
        })
    }

    /// `GET /info` on a single node, parsed into a semver `Version` when
    /// the advertised string is valid. An unparsable or missing version
    /// is treated as pre-v1 by the version pivot.
    pub async fn get_version(&self, address: &str) -> Result<Option<semver::Version>> {
        let url = format!("http://{address}/info");
        let info: data::InfoResponse = get_json(&self.client, &url, self.config.request_timeout)
            .await
            .map_err(|message| Error::Request { address: address.to_string(), message })?;
        Ok(semver::Version::parse(&info.version).ok())
    }

    /// `GET /listlookup` on a single node: the leader and full node
    /// list, used for the leader pivot on write operations.
    pub async fn list_lookup(&self, address: &str) -> Result<data::ListLookupResponse> {
        let url = format!("http://{address}/listlookup");
        get_json(&self.client, &url, self.config.request_timeout)
            .await
            .map_err(|message| Error::Request { address: address.to_string(), message })
    }

    /// Creates `topic` on the cluster's leader lookup node, using the v1
    /// or deprecated URI depending on the leader's advertised version.
    pub async fn create_topic(&self, addresses: &[String], topic: &str) -> Result<()> {
        self.post_topic_action(addresses, "create", topic).await
    }

    /// Deletes `topic` on the cluster's leader lookup node.
    pub async fn delete_topic(&self, addresses: &[String], topic: &str) -> Result<()> {
        self.post_topic_action(addresses, "delete", topic).await
    }

    async fn post_topic_action(&self, addresses: &[String], action: &str, topic: &str) -> Result<()> {
        let leader = self.leader_address(addresses).await?;
        let pivot = semver::Version::parse(self.config.version_pivot)
            .expect("configured version pivot is valid semver");
        let version = self.get_version(&leader).await.ok().flatten();
        let (deprecated, v1) = (format!("{action}_topic"), format!("topic/{action}"));
        let uri = select_uri(version.as_ref(), &pivot, &deprecated, &v1);
        let url = format!("http://{leader}/{uri}?topic={topic}");
        post(&self.client, &url, self.config.request_timeout)
            .await
            .map_err(|message| Error::Request { address: leader, message })
    }

    /// Tombstones `topic` on `node`, fanned out across every address in
    /// `addresses` (unlike `create_topic`/`delete_topic`, which route
    /// only through the leader): each lookup node independently stops
    /// advertising the producer, so every node must be told, not just
    /// the leader. Each address gets its own version pivot (`GetVersion`
    /// is per-node, not cluster-wide). Partial failure is tolerated: an
    /// address that errors is recorded in `errors` rather than failing
    /// the whole call, matching the original's `ErrList`/`PartialErr`
    /// accumulation in `TombstoneNodeForTopic`.
    pub async fn tombstone_node_for_topic(
        &self,
        addresses: &[String],
        topic: &str,
        node: &str,
    ) -> Result<Aggregate<()>> {
        let pivot = semver::Version::parse(self.config.version_pivot)
            .expect("configured version pivot is valid semver");
        let qs = format!("topic={topic}&node={node}");

        let mut handles = Vec::with_capacity(addresses.len());
        for address in addresses {
            let client = self.client.clone();
            let timeout = self.config.request_timeout;
            let address = address.clone();
            let qs = qs.clone();
            let pivot = pivot.clone();
            handles.push(tokio::spawn(async move {
                let version = get_version_json(&client, &address, timeout).await.ok().flatten();
                let uri = select_uri(
                    version.as_ref(),
                    &pivot,
                    "tombstone_topic_producer",
                    "topic/tombstone",
                );
                let url = format!("http://{address}/{uri}?{qs}");
                let result = post(&client, &url, timeout).await;
                (address, result)
            }));
        }

        let joined = futures_util::future::join_all(handles).await;
        let mut errs = Vec::new();
        for outcome in joined {
            match outcome {
                Ok((_, Ok(()))) => {}
                Ok((address, Err(message))) => errs.push((address, message)),
                Err(join_err) => errs.push(("<task>".to_string(), join_err.to_string())),
            }
        }
        if !errs.is_empty() && errs.len() == addresses.len() {
            return Err(Error::TotalFailure(errs));
        }
        Ok(Aggregate { value: (), errors: errs })
    }

    /// Queries `addresses` in turn until one answers `/listlookup`,
    /// returning its reported leader's `HTTPAddress`. Read operations
    /// may hit any node; write operations must route through this.
    async fn leader_address(&self, addresses: &[String]) -> Result<String> {
        let mut last_err = None;
        for address in addresses {
            match self.list_lookup(address).await {
                Ok(resp) => {
                    let leader = resp.leader_node;
                    return Ok(format!("{}:{}", leader.broadcast_address, leader.http_port));
                }
                Err(err) => {
                    warn!("listlookup against {address} failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::TotalFailure(Vec::new())))
    }

    async fn fan_out_json<T>(&self, addresses: &[String], path: &str) -> (Vec<(String, T)>, Vec<(String, String)>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut handles = Vec::with_capacity(addresses.len());
        for address in addresses {
            let client = self.client.clone();
            let url = format!("http://{address}{path}");
            let address = address.clone();
            let timeout = self.config.request_timeout;
            handles.push(tokio::spawn(async move {
                let result = get_json::<T>(&client, &url, timeout).await;
                (address, result)
            }));
        }

        let joined = futures_util::future::join_all(handles).await;
        let mut oks = Vec::new();
        let mut errs = Vec::new();
        for outcome in joined {
            match outcome {
                Ok((address, Ok(value))) => oks.push((address, value)),
                Ok((address, Err(message))) => errs.push((address, message)),
                Err(join_err) => errs.push(("<task>".to_string(), join_err.to_string())),
            }
        }
        (oks, errs)
    }
}

/// Picks the deprecated or v1 URI fragment for a node depending on its
/// advertised version against `pivot`, mirroring
/// `versionPivotNSQLookupd`'s per-address endpoint choice.
fn select_uri<'a>(version: Option<&semver::Version>, pivot: &semver::Version, deprecated: &'a str, v1: &'a str) -> &'a str {
    match version {
        Some(v) if *v >= *pivot => v1,
        _ => deprecated,
    }
}

async fn get_version_json(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> std::result::Result<Option<semver::Version>, String> {
    let url = format!("http://{address}/info");
    let info: data::InfoResponse = get_json(client, &url, timeout).await?;
    Ok(semver::Version::parse(&info.version).ok())
}

async fn post(client: &reqwest::Client, url: &str, timeout: Duration) -> std::result::Result<(), String> {
    let resp = client
        .post(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }
    Ok(())
}

fn mark_out_of_date(mut producers: Vec<ProducerInfo>) -> Vec<ProducerInfo> {
    let max_version = producers
        .iter()
        .filter_map(|p| semver::Version::parse(&p.version).ok())
        .max();
    if let Some(max_version) = &max_version {
        for p in producers.iter_mut() {
            let v = semver::Version::parse(&p.version).ok();
            p.out_of_date = v.map(|v| v < *max_version).unwrap_or(true);
        }
    }
    producers.sort_by(|a, b| a.http_address().cmp(&b.http_address()));
    producers
}

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> std::result::Result<T, String> {
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }
    resp.json::<T>().await.map_err(|e| e.to_string())
}
