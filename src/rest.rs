//! REST registry backend: JSON over HTTPS
//!
//! This registry exposes a stateless reseller API: every call carries the
//! account's `auth-userid`/`api-key` pair, responses are JSON, and a
//! registry-level failure arrives as a `status`/`message` pair even on HTTP
//! 200. The registry stores DS records rather than DNSKEYs, so the desired
//! state is projected to DS before diffing, and mutations go record by
//! record through separate add/delete calls gated on the registry having no
//! DNSSEC actions still pending.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::RegistryBackend;
use crate::config::RestConfig;
use crate::diff::UpdatePlan;
use crate::epp::codec::TransportError;
use crate::error::{RegistryError, Result};
use crate::keyset::{DsRecord, KeySet, ZoneName};

pub struct RestBackend {
    config: RestConfig,
    client: reqwest::Client,
    /// Registry order ids by zone, filled on first lookup; mutations need
    /// the order id and the precondition check will already have fetched it
    order_ids: HashMap<String, String>,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RegistryError::Config(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            order_ids: HashMap::new(),
        })
    }

    fn auth_params(&self) -> Vec<(String, String)> {
        vec![
            ("auth-userid".to_string(), self.config.auth_id.clone()),
            ("api-key".to_string(), self.config.api_key.clone()),
        ]
    }

    async fn get_json(&self, base: &str, command: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{base}{command}");
        let mut query = self.auth_params();
        query.extend_from_slice(params);

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(http_err)?;
        response
            .json::<Value>()
            .await
            .map_err(|e| RegistryError::Protocol(format!("Invalid JSON from {command}: {e}")))
    }

    async fn post_json(&self, command: &str, params: Vec<(String, String)>) -> Result<Value> {
        let url = format!("{}{command}", self.config.domains_base_url);
        let mut form = self.auth_params();
        form.extend(params);

        debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(http_err)?;
        response
            .json::<Value>()
            .await
            .map_err(|e| RegistryError::Protocol(format!("Invalid JSON from {command}: {e}")))
    }

    /// Domain details including order and DNSSEC data. A `status` member in
    /// the details response always signals a registry-level failure.
    async fn fetch_domain_info(&mut self, zone: &ZoneName) -> Result<Value> {
        let domain = zone.as_registry_str();
        let params = vec![
            ("domain-name".to_string(), domain.clone()),
            ("options".to_string(), "OrderDetails".to_string()),
            ("options".to_string(), "DNSSECDetails".to_string()),
        ];
        let info = self
            .get_json(&self.config.domains_base_url, "details-by-name.json", &params)
            .await?;

        if let Some(status) = info.get("status") {
            return Err(rejected(
                zone,
                "domain details",
                status,
                info.get("message"),
            ));
        }

        if let Some(order_id) = info.get("orderid").and_then(value_as_string) {
            self.order_ids.insert(domain, order_id);
        }
        Ok(info)
    }

    async fn order_id(&mut self, zone: &ZoneName) -> Result<String> {
        if let Some(id) = self.order_ids.get(&zone.as_registry_str()) {
            return Ok(id.clone());
        }
        self.fetch_domain_info(zone).await?;
        self.order_ids
            .get(&zone.as_registry_str())
            .cloned()
            .ok_or_else(|| {
                RegistryError::Protocol(format!("Registry returned no order id for {zone}"))
            })
    }

    /// Number of AddDNSSEC/DelDNSSEC actions the registry still has queued
    /// for this order. `None` means the answer could not be determined.
    async fn pending_dnssec_actions(&self, order_id: &str) -> Result<Option<u64>> {
        let params = vec![
            ("order-id".to_string(), order_id.to_string()),
            ("no-of-records".to_string(), "50".to_string()),
            ("page-no".to_string(), "1".to_string()),
            ("action-type1".to_string(), "AddDNSSEC".to_string()),
            ("action-type2".to_string(), "DelDNSSEC".to_string()),
        ];
        let data = self
            .get_json(&self.config.actions_base_url, "search-current.json", &params)
            .await?;
        Ok(pending_count(&data))
    }

    async fn apply_one(
        &self,
        zone: &ZoneName,
        order_id: &str,
        command: &str,
        record: &DsRecord,
        operation: &str,
    ) -> Result<()> {
        let mut params = vec![("order-id".to_string(), order_id.to_string())];
        params.extend(ds_attr_map(record));
        let result = self.post_json(command, params).await?;

        if let Some(status) = result.get("status") {
            if status.as_str() != Some("Success") {
                return Err(rejected(zone, operation, status, result.get("message")));
            }
        }
        info!("{operation} succeeded for {zone} ({record})");
        Ok(())
    }
}

#[async_trait]
impl RegistryBackend for RestBackend {
    type Record = DsRecord;

    /// Nothing to establish; the API is stateless.
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Safe to push only when the pending DNSSEC action count is exactly
    /// zero. Any failure to determine the count fails closed: racing a
    /// change the registry is still processing is never acceptable.
    async fn precondition_ok(&mut self, zone: &ZoneName) -> Result<bool> {
        let order_id = match self.order_id(zone).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Cannot resolve order id for {zone}: {e}");
                return Ok(false);
            }
        };
        let pending = self.pending_dnssec_actions(&order_id).await;
        Ok(pending_actions_allow(zone, pending))
    }

    /// The registry's view of the desired state: one DS per SEP key,
    /// derived with the configured digest type.
    fn desired_records(&self, zone: &ZoneName, desired: &KeySet) -> Vec<DsRecord> {
        desired
            .sep_only()
            .iter()
            .map(|key| DsRecord::from_key(zone, key, self.config.ds_digest_type))
            .collect()
    }

    /// Current DS set from the domain details; a domain without DNSSEC data
    /// simply has an empty set.
    async fn fetch_current_keys(&mut self, zone: &ZoneName) -> Result<Vec<DsRecord>> {
        let info = self.fetch_domain_info(zone).await?;
        let Some(entries) = info.get("dnssec").and_then(Value::as_array) else {
            debug!("{zone} has no DNSSEC data at the registry");
            return Ok(Vec::new());
        };
        entries
            .iter()
            .map(|entry| ds_from_json(entry).ok_or_else(|| {
                RegistryError::Protocol(format!("Malformed DS entry for {zone}: {entry}"))
            }))
            .collect()
    }

    /// Removals first, then additions, one API call per record. A failure
    /// partway through reports exactly how far the plan got; the registry
    /// is then in a known intermediate state a later run will converge.
    async fn apply_plan(&mut self, zone: &ZoneName, plan: &UpdatePlan<DsRecord>) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let order_id = self.order_id(zone).await?;

        let mut removed = 0usize;
        let mut added = 0usize;
        for record in &plan.to_remove {
            self.apply_one(zone, &order_id, "del-dnssec.json", record, "DS removal")
                .await
                .map_err(|e| partial(zone, removed, added, e))?;
            removed += 1;
        }
        for record in &plan.to_add {
            self.apply_one(zone, &order_id, "add-dnssec.json", record, "DS addition")
                .await
                .map_err(|e| partial(zone, removed, added, e))?;
            added += 1;
        }
        Ok(())
    }

    async fn close(&mut self) {}
}

fn http_err(e: reqwest::Error) -> RegistryError {
    let transport = if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    };
    RegistryError::Transport(transport)
}

fn rejected(zone: &ZoneName, operation: &str, status: &Value, message: Option<&Value>) -> RegistryError {
    RegistryError::Rejected {
        zone: zone.as_registry_str(),
        operation: operation.to_string(),
        code: value_as_string(status).unwrap_or_else(|| status.to_string()),
        message: message
            .and_then(value_as_string)
            .unwrap_or_default(),
        detail: String::new(),
    }
}

/// Progress made before `cause` hit. A failure on the very first call left
/// the registry untouched and is reported as-is.
fn partial(zone: &ZoneName, removed: usize, added: usize, cause: RegistryError) -> RegistryError {
    if removed == 0 && added == 0 {
        return cause;
    }
    RegistryError::PartiallyApplied {
        zone: zone.as_registry_str(),
        removed,
        added,
        cause: Box::new(cause),
    }
}

/// The registry's "map" encoding for one DS record: numbered
/// attr-name/attr-value pairs, digest in hex
fn ds_attr_map(record: &DsRecord) -> Vec<(String, String)> {
    let fields = [
        ("keytag", record.key_tag.to_string()),
        ("algorithm", record.algorithm.to_string()),
        ("digesttype", record.digest_type.to_string()),
        ("digest", record.digest_hex()),
    ];
    let mut map = Vec::with_capacity(fields.len() * 2);
    for (index, (name, value)) in fields.into_iter().enumerate() {
        map.push((format!("attr-name{}", index + 1), name.to_string()));
        map.push((format!("attr-value{}", index + 1), value));
    }
    map
}

/// The API is loose about numeric types; accept both numbers and numeric
/// strings.
fn value_as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn ds_from_json(entry: &Value) -> Option<DsRecord> {
    Some(DsRecord {
        key_tag: u16::try_from(value_as_u64(entry.get("keytag")?)?).ok()?,
        algorithm: u8::try_from(value_as_u64(entry.get("algorithm")?)?).ok()?,
        digest_type: u8::try_from(value_as_u64(entry.get("digesttype")?)?).ok()?,
        digest: hex::decode(entry.get("digest")?.as_str()?).ok()?,
    })
}

/// Decide whether mutations may proceed given the pending-action answer.
/// Only a confirmed count of exactly zero allows them; an indeterminate
/// answer or a failed query fails closed.
fn pending_actions_allow(zone: &ZoneName, pending: Result<Option<u64>>) -> bool {
    match pending {
        Ok(Some(0)) => true,
        Ok(Some(n)) => {
            info!("{zone} has {n} pending DNSSEC action(s), holding off");
            false
        }
        Ok(None) => {
            warn!("Pending-action query for {zone} returned unexpected data");
            false
        }
        Err(e) => {
            warn!("Pending-action query for {zone} failed: {e}");
            false
        }
    }
}

/// Interpret a pending-action search result. A record count comes back in
/// `recsindb`; the registry reports an empty queue as the error "No record
/// found". Anything else is indeterminate.
fn pending_count(data: &Value) -> Option<u64> {
    if let Some(count) = data.get("recsindb").and_then(value_as_u64) {
        return Some(count);
    }
    let status = data.get("status").and_then(Value::as_str);
    let message = data.get("message").and_then(Value::as_str);
    if status == Some("ERROR") && message == Some("No record found") {
        return Some(0);
    }
    None
}
