//! A real `BlockSource`/`Scheduler` pair over JSON-RPC + `tokio::time`.
//! Deliberately minimal: just enough JSON-RPC to run the engine against a
//! live endpoint, not a general-purpose Ethereum client.

use crate::{
  block::{Block, Hash},
  error::FetchError,
  source::{BlockSource, Scheduler},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

pub struct JsonRpcSource {
  client: reqwest::Client,
  endpoint: String,
  next_id: AtomicU64,
}

impl JsonRpcSource {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      endpoint: endpoint.into(),
      next_id: AtomicU64::new(1),
    }
  }

  async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, FetchError> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let request = RpcRequest {
      jsonrpc: "2.0",
      id,
      method,
      params,
    };
    let response = self
      .client
      .post(&self.endpoint)
      .json(&request)
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;
    let body: RpcResponse<T> = response
      .json()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;
    if let Some(error) = body.error {
      return Err(FetchError::Transport(format!(
        "rpc error {}: {}",
        error.code, error.message
      )));
    }
    body.result.ok_or(FetchError::NotFound)
  }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
  jsonrpc: &'static str,
  id: u64,
  method: &'a str,
  params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
  #[serde(default)]
  result: Option<T>,
  #[serde(default)]
  error: Option<RpcErrorObj>,
}

#[derive(Deserialize)]
struct RpcErrorObj {
  code: i64,
  message: String,
}

#[derive(Deserialize)]
struct RpcBlock {
  hash: Hash,
  #[serde(rename = "parentHash")]
  parent_hash: Hash,
  number: String,
}

fn parse_quantity(raw: &str) -> Result<u64, FetchError> {
  let digits = raw
    .strip_prefix("0x")
    .ok_or_else(|| FetchError::Transport(format!("quantity {raw:?} missing 0x prefix")))?;
  u64::from_str_radix(digits, 16).map_err(|e| FetchError::Transport(e.to_string()))
}

impl TryFrom<RpcBlock> for Block {
  type Error = FetchError;

  fn try_from(raw: RpcBlock) -> Result<Self, Self::Error> {
    Ok(Block::new(raw.hash, raw.parent_hash, parse_quantity(&raw.number)?))
  }
}

fn to_quantity(number: u64) -> String {
  format!("0x{number:x}")
}

#[async_trait]
impl BlockSource for JsonRpcSource {
  async fn get_block_by_hash(&self, hash: Hash) -> Result<Block, FetchError> {
    let raw: RpcBlock = self
      .call("eth_getBlockByHash", serde_json::json!([hash.to_string(), false]))
      .await?;
    raw.try_into()
  }

  async fn get_block_by_number(&self, number: u64) -> Result<Block, FetchError> {
    let raw: RpcBlock = self
      .call(
        "eth_getBlockByNumber",
        serde_json::json!([to_quantity(number), false]),
      )
      .await?;
    raw.try_into()
  }

  async fn get_latest_block(&self) -> Result<Block, FetchError> {
    let raw: RpcBlock = self
      .call("eth_getBlockByNumber", serde_json::json!(["latest", false]))
      .await?;
    raw.try_into()
  }

  async fn get_block_number(&self) -> Result<u64, FetchError> {
    let raw: String = self.call("eth_blockNumber", serde_json::json!([])).await?;
    parse_quantity(&raw)
  }
}

/// `Scheduler` backed by `tokio::time::sleep`. This is the only
/// implementation shipped: tests drive it deterministically via
/// `tokio::time::pause`/`advance` rather than substituting a fake.
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
  async fn sleep(&self, duration: Duration) {
    tokio::time::sleep(duration).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quantity_parses_hex_and_rejects_missing_prefix() {
    assert_eq!(parse_quantity("0x2a").unwrap(), 42);
    assert!(parse_quantity("2a").is_err());
  }

  #[test]
  fn quantity_roundtrips() {
    assert_eq!(parse_quantity(&to_quantity(1234)).unwrap(), 1234);
  }
}
