//! Ryu Connector - OpenFlow drop rules through the Ryu REST API
//!
//! `POST {base}/stats/flowentry/add` with an empty action list, which the
//! switch treats as drop. Rules expire on the switch via `hard_timeout`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};

use super::types::{EnforcementError, EnforcementOutcome, EnforcementRequest, EnforcementStatus};
use super::EnforcementConnector;

// ============================================================================
// CONSTANTS
// ============================================================================

const FLOW_ADD_PATH: &str = "/stats/flowentry/add";
const RULE_PRIORITY: u32 = 100;
const ETH_TYPE_IPV4: u32 = 0x0800;
const ETH_TYPE_IPV6: u32 = 0x86DD;

// ============================================================================
// CONNECTOR
// ============================================================================

pub struct RyuConnector {
    base_url: String,
    dpid: u64,
    http_client: reqwest::Client,
    /// (src, dst) -> unix time the installed rule expires
    blocked: RwLock<HashMap<(String, String), i64>>,
}

impl RyuConnector {
    pub fn new(base_url: &str, dpid: u64, timeout: Duration) -> Result<Self, EnforcementError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnforcementError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            dpid,
            http_client,
            blocked: RwLock::new(HashMap::new()),
        })
    }

    /// OpenFlow rule body for a request
    pub fn flow_rule(&self, request: &EnforcementRequest) -> Result<Value, EnforcementError> {
        if request.block_duration_secs == 0 {
            return Err(EnforcementError::InvalidRequest {
                reason: "block duration must be positive (hard_timeout 0 never expires)".into(),
            });
        }
        let src = parse_addr(&request.src)?;
        let dst = parse_addr(&request.dst)?;

        let rule_match = match (src, dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => json!({
                "ipv4_src": s.to_string(),
                "ipv4_dst": d.to_string(),
                "eth_type": ETH_TYPE_IPV4,
            }),
            (IpAddr::V6(s), IpAddr::V6(d)) => json!({
                "ipv6_src": s.to_string(),
                "ipv6_dst": d.to_string(),
                "eth_type": ETH_TYPE_IPV6,
            }),
            _ => {
                return Err(EnforcementError::InvalidRequest {
                    reason: format!("mixed address families: {} -> {}", request.src, request.dst),
                })
            }
        };

        Ok(json!({
            "dpid": self.dpid,
            "priority": RULE_PRIORITY,
            "hard_timeout": request.block_duration_secs,
            "match": rule_match,
            "actions": [],
        }))
    }

    fn is_blocked(&self, pair: &(String, String), now: i64) -> bool {
        self.blocked
            .read()
            .get(pair)
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }

    /// Pairs with an unexpired rule
    pub fn blocked_pairs(&self) -> Vec<(String, String)> {
        let now = Utc::now().timestamp();
        self.blocked
            .read()
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(pair, _)| pair.clone())
            .collect()
    }
}

fn parse_addr(addr: &str) -> Result<IpAddr, EnforcementError> {
    addr.parse().map_err(|_| EnforcementError::InvalidRequest {
        reason: format!("not an IP address: {}", addr),
    })
}

#[async_trait]
impl EnforcementConnector for RyuConnector {
    fn name(&self) -> &'static str {
        "ryu"
    }

    async fn block(&self, request: &EnforcementRequest) -> Result<EnforcementOutcome, EnforcementError> {
        let start = Instant::now();
        let pair = request.pair();
        let now = Utc::now().timestamp();

        // Check if already blocked
        if self.is_blocked(&pair, now) {
            return Ok(EnforcementOutcome::new(
                request.clone(),
                EnforcementStatus::AlreadyBlocked,
                0,
            ));
        }

        let rule = self.flow_rule(request)?;
        let url = format!("{}{}", self.base_url, FLOW_ADD_PATH);

        let response = self
            .http_client
            .post(&url)
            .json(&rule)
            .send()
            .await
            .map_err(|e| EnforcementError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnforcementError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let mut blocked = self.blocked.write();
        blocked.retain(|_, expires| *expires > now);
        blocked.insert(pair, now + request.block_duration_secs as i64);
        drop(blocked);

        Ok(EnforcementOutcome::new(
            request.clone(),
            EnforcementStatus::Applied,
            start.elapsed().as_millis() as u64,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
