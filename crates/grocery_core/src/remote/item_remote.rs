//! Remote list store contract and REST implementation.
//!
//! Wire rows use the table's column names: `name`, `quantity`, `removed`
//! (the fulfilled flag), `added_at` and `removed_at`.

use crate::config::RemoteSettings;
use crate::model::item::ListItem;
use crate::model::now_epoch_ms;
use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const TABLE_PATH: &str = "rest/v1/grocery_items";
const SELECT_COLUMNS: &str = "name,quantity,removed,added_at,removed_at";

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote store failure. Logged at the engine boundary, never surfaced to
/// list callers.
#[derive(Debug)]
pub enum RemoteError {
    InvalidUrl(String),
    Http(reqwest::Error),
    Status {
        operation: &'static str,
        status: u16,
    },
    Decode(String),
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl(value) => write!(f, "invalid remote store url: {value}"),
            Self::Http(err) => write!(f, "remote store request failed: {err}"),
            Self::Status { operation, status } => {
                write!(f, "remote store {operation} returned HTTP {status}")
            }
            Self::Decode(message) => write!(f, "remote store response invalid: {message}"),
        }
    }
}

impl Error for RemoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// Partial update applied to one remote row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPatch {
    Fulfillment {
        fulfilled: bool,
        fulfilled_at_ms: Option<i64>,
    },
    Quantity(u32),
}

impl ItemPatch {
    pub fn fulfillment_of(item: &ListItem) -> Self {
        Self::Fulfillment {
            fulfilled: item.fulfilled,
            fulfilled_at_ms: item.fulfilled_at_ms,
        }
    }

    /// JSON body; a cleared timestamp is sent as an explicit `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Fulfillment {
                fulfilled,
                fulfilled_at_ms,
            } => json!({ "removed": fulfilled, "removed_at": fulfilled_at_ms }),
            Self::Quantity(quantity) => json!({ "quantity": quantity }),
        }
    }
}

/// Mirror-side contract the reconciliation engine writes through.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `false` means every operation is a no-op and callers may skip them.
    fn is_configured(&self) -> bool;
    async fn fetch_all(&self) -> RemoteResult<Vec<ListItem>>;
    /// Create-or-replace keyed by name.
    async fn upsert(&self, item: &ListItem) -> RemoteResult<()>;
    async fn patch(&self, name: &str, patch: &ItemPatch) -> RemoteResult<()>;
    async fn delete(&self, name: &str) -> RemoteResult<()>;
    async fn delete_fulfilled(&self) -> RemoteResult<()>;
    async fn delete_all(&self) -> RemoteResult<()>;
}

#[derive(Debug, Serialize)]
struct RemoteItemRow<'a> {
    name: &'a str,
    quantity: u32,
    removed: bool,
    added_at: i64,
    removed_at: Option<i64>,
}

impl<'a> From<&'a ListItem> for RemoteItemRow<'a> {
    fn from(item: &'a ListItem) -> Self {
        Self {
            name: item.name.as_str(),
            quantity: item.quantity,
            removed: item.fulfilled,
            added_at: item.created_at_ms,
            removed_at: item.fulfilled_at_ms,
        }
    }
}

/// REST adapter for the `grocery_items` table.
pub struct RestRemoteStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestRemoteStore {
    pub fn new(settings: &RemoteSettings) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim().trim_end_matches('/').to_string(),
            api_key: settings.api_key.trim().to_string(),
        })
    }

    /// Adapter with no credentials; every call is a silent no-op.
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            api_key: String::new(),
        }
    }

    fn table_url(&self, query: &[(&str, &str)]) -> RemoteResult<Url> {
        let raw = format!("{}/{TABLE_PATH}", self.base_url);
        let mut url = Url::parse(&raw).map_err(|err| RemoteError::InvalidUrl(format!("{raw}: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", self.api_key.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
    }

    async fn execute(&self, operation: &'static str, request: RequestBuilder) -> RemoteResult<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                operation,
                status: status.as_u16(),
            });
        }
        debug!("event=remote_request module=remote status=ok operation={operation}");
        Ok(())
    }

    fn skip(&self, operation: &'static str) -> bool {
        if self.is_configured() {
            return false;
        }
        debug!(
            "event=remote_request module=remote status=skip operation={operation} reason=unconfigured"
        );
        true
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }

    async fn fetch_all(&self) -> RemoteResult<Vec<ListItem>> {
        if self.skip("fetch_all") {
            return Ok(Vec::new());
        }
        let url = self.table_url(&[("select", SELECT_COLUMNS)])?;
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                operation: "fetch_all",
                status: status.as_u16(),
            });
        }
        let body: Value = response.json().await?;
        let rows = body
            .as_array()
            .ok_or_else(|| RemoteError::Decode("expected a JSON array of rows".to_string()))?;
        let now = now_epoch_ms();
        Ok(rows.iter().filter_map(|row| item_from_row(row, now)).collect())
    }

    async fn upsert(&self, item: &ListItem) -> RemoteResult<()> {
        if self.skip("upsert") {
            return Ok(());
        }
        let url = self.table_url(&[("on_conflict", "name")])?;
        let request = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates")
            .json(&RemoteItemRow::from(item));
        self.execute("upsert", request).await
    }

    async fn patch(&self, name: &str, patch: &ItemPatch) -> RemoteResult<()> {
        if self.skip("patch") {
            return Ok(());
        }
        let filter = format!("eq.{name}");
        let url = self.table_url(&[("name", filter.as_str())])?;
        let request = self.request(Method::PATCH, url).json(&patch.to_json());
        self.execute("patch", request).await
    }

    async fn delete(&self, name: &str) -> RemoteResult<()> {
        if self.skip("delete") {
            return Ok(());
        }
        let filter = format!("eq.{name}");
        let url = self.table_url(&[("name", filter.as_str())])?;
        self.execute("delete", self.request(Method::DELETE, url)).await
    }

    async fn delete_fulfilled(&self) -> RemoteResult<()> {
        if self.skip("delete_fulfilled") {
            return Ok(());
        }
        let url = self.table_url(&[("removed", "eq.true")])?;
        self.execute("delete_fulfilled", self.request(Method::DELETE, url))
            .await
    }

    async fn delete_all(&self) -> RemoteResult<()> {
        if self.skip("delete_all") {
            return Ok(());
        }
        let url = self.table_url(&[("name", "not.is.null")])?;
        self.execute("delete_all", self.request(Method::DELETE, url))
            .await
    }
}

/// Lenient row decoding; rows without a usable name are dropped.
fn item_from_row(row: &Value, now_ms: i64) -> Option<ListItem> {
    let name = row.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let quantity = row
        .get("quantity")
        .and_then(Value::as_i64)
        .map_or(1, |value| u32::try_from(value.max(1)).unwrap_or(u32::MAX));
    let removed = row.get("removed").and_then(Value::as_bool).unwrap_or(false);
    let added_at = row.get("added_at").and_then(Value::as_i64).unwrap_or(now_ms);
    let removed_at = row.get("removed_at").and_then(Value::as_i64);

    Some(ListItem {
        name: name.to_string(),
        quantity,
        fulfilled: removed,
        created_at_ms: added_at,
        fulfilled_at_ms: if removed {
            Some(removed_at.unwrap_or(added_at))
        } else {
            None
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{item_from_row, ItemPatch, RemoteItemRow, RemoteStore, RestRemoteStore};
    use crate::config::RemoteSettings;
    use crate::model::item::ListItem;
    use serde_json::json;

    fn configured() -> RestRemoteStore {
        RestRemoteStore::new(&RemoteSettings {
            base_url: "https://lists.example.test/".to_string(),
            api_key: "anon-key".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn table_url_encodes_name_filters() {
        let store = configured();
        let url = store.table_url(&[("name", "eq.green apples")]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://lists.example.test/rest/v1/grocery_items?name=eq.green+apples"
        );
    }

    #[test]
    fn blank_credentials_mean_unconfigured() {
        let store = RestRemoteStore::new(&RemoteSettings {
            base_url: "https://lists.example.test".to_string(),
            api_key: "   ".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert!(!store.is_configured());
        assert!(configured().is_configured());
    }

    #[tokio::test]
    async fn unconfigured_store_is_a_silent_noop() {
        let store = RestRemoteStore::disabled();
        assert!(store.fetch_all().await.unwrap().is_empty());
        store.upsert(&ListItem::new("milk", 2, 1)).await.unwrap();
        store.delete_all().await.unwrap();
    }

    #[test]
    fn row_serialization_uses_table_columns() {
        let mut item = ListItem::new("milk", 2, 100);
        item.set_fulfilled(true, 200);
        let value = serde_json::to_value(RemoteItemRow::from(&item)).unwrap();
        assert_eq!(
            value,
            json!({"name": "milk", "quantity": 2, "removed": true, "added_at": 100, "removed_at": 200})
        );
    }

    #[test]
    fn fulfillment_patch_sends_explicit_null_when_cleared() {
        let patch = ItemPatch::Fulfillment {
            fulfilled: false,
            fulfilled_at_ms: None,
        };
        assert_eq!(patch.to_json(), json!({"removed": false, "removed_at": null}));
    }

    #[test]
    fn row_decoding_fills_defaults_and_repairs_timestamps() {
        let item = item_from_row(&json!({"name": " eggs ", "removed": true, "added_at": 5}), 99)
            .unwrap();
        assert_eq!(item.name, "eggs");
        assert_eq!(item.quantity, 1);
        assert_eq!(item.fulfilled_at_ms, Some(5));
        item.validate().unwrap();

        let open = item_from_row(&json!({"name": "rice", "quantity": 0, "removed_at": 7}), 99)
            .unwrap();
        assert_eq!(open.quantity, 1);
        assert_eq!(open.created_at_ms, 99);
        assert_eq!(open.fulfilled_at_ms, None);

        assert!(item_from_row(&json!({"name": "  "}), 99).is_none());
        assert!(item_from_row(&json!([1, 2]), 99).is_none());
    }
}
