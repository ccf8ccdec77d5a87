//! OpenSearch-backed store.

use crate::{
    config::OpenSearchConfig,
    document::{WriteAck, WriteResult},
    error::{RepositoryError, Result},
    store::{
        BulkAction, BulkItemResponse, DeleteRequest, IndexRequest, SearchResponse, Store,
        StoredDocument, WriteMode, keep_alive_param, version_of,
    },
};
use async_trait::async_trait;
use opensearch::{
    BulkParts, ClearScrollParts, CountParts, DeleteParts, GetParts, IndexParts, OpenSearch,
    ScrollParts, SearchParts,
    http::{
        StatusCode,
        request::JsonBody,
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    indices::IndicesRefreshParts,
    params::{OpType, Refresh},
};
use searchkit_log::{debug, info};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// [`Store`] implementation talking to an OpenSearch cluster through the
/// `opensearch` crate.
#[derive(Clone)]
pub struct OpenSearchStore {
    client: Arc<OpenSearch>,
    config: Arc<OpenSearchConfig>,
}

impl OpenSearchStore {
    /// Create a new store from connection settings.
    pub fn new(config: OpenSearchConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing OpenSearch store for: {:?}", config.urls);

        let url = config
            .urls
            .first()
            .ok_or_else(|| RepositoryError::Config("No URLs provided".to_string()))?;
        let url = opensearch::http::Url::parse(url)
            .map_err(|e| RepositoryError::Config(format!("Invalid URL: {}", e)))?;

        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool).timeout(config.request_timeout);

        if config.disable_proxy {
            builder = builder.disable_proxy();
        }

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.auth(opensearch::auth::Credentials::Basic(
                user.clone(),
                pass.clone(),
            ));
        }

        #[cfg(any(feature = "rustls", feature = "native-tls"))]
        if let Some(tls) = &config.tls {
            builder = builder.cert_validation(cert_validation(tls)?);
        }

        let transport = builder
            .build()
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;

        debug!("OpenSearch store initialized");

        Ok(Self::from_client(OpenSearch::new(transport), config))
    }

    /// Wrap an already configured client.
    pub fn from_client(client: OpenSearch, config: OpenSearchConfig) -> Self {
        Self {
            client: Arc::new(client),
            config: Arc::new(config),
        }
    }

    /// Get the underlying OpenSearch client.
    pub fn inner(&self) -> &OpenSearch {
        &self.client
    }

    /// Get the configuration.
    pub fn config(&self) -> &OpenSearchConfig {
        &self.config
    }
}

#[cfg(any(feature = "rustls", feature = "native-tls"))]
fn cert_validation(
    tls: &crate::config::TlsConfig,
) -> Result<opensearch::cert::CertificateValidation> {
    use opensearch::cert::{Certificate, CertificateValidation};

    if tls.danger_accept_invalid_certs {
        return Ok(CertificateValidation::None);
    }

    match &tls.ca_cert {
        Some(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                RepositoryError::Config(format!("Cannot read CA certificate {}: {}", path, e))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| RepositoryError::Config(format!("Invalid CA certificate: {}", e)))?;
            Ok(CertificateValidation::Full(cert))
        }
        None => Ok(CertificateValidation::Default),
    }
}

/// Extract a readable reason from an error response body.
fn error_reason(body: &Value) -> String {
    match &body["error"] {
        Value::String(reason) => reason.clone(),
        Value::Object(error) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            format!("{}: {}", kind, reason)
        }
        _ => body
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    }
}

/// Read a response body, mapping non-success statuses onto the taxonomy.
async fn read_body(response: Response, index: &str, id: &str) -> Result<Value> {
    let status = response.status_code();
    let body: Value = response.json().await?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(RepositoryError::from_status(
            status.as_u16(),
            error_reason(&body),
            index,
            id,
        ))
    }
}

fn write_ack(body: &Value, index: &str, id: &str, fallback: WriteResult) -> Result<WriteAck> {
    let version = version_of(body).ok_or_else(|| RepositoryError::Server {
        status: 500,
        reason: format!("write response for {}/{} carries no sequence number", index, id),
    })?;

    Ok(WriteAck {
        index: body["_index"].as_str().unwrap_or(index).to_string(),
        id: body["_id"].as_str().unwrap_or(id).to_string(),
        result: body["result"]
            .as_str()
            .and_then(WriteResult::parse)
            .unwrap_or(fallback),
        version,
        doc_version: body["_version"].as_i64().unwrap_or(0),
    })
}

#[async_trait]
impl Store for OpenSearchStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>> {
        debug!("Getting document {} from index {}", id, index);

        let response = self
            .client
            .get(GetParts::IndexId(index, id))
            .send()
            .await?;

        if response.status_code() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = read_body(response, index, id).await?;
        if !body["found"].as_bool().unwrap_or(false) {
            return Ok(None);
        }

        let version = version_of(&body).ok_or_else(|| RepositoryError::Server {
            status: 500,
            reason: format!("get response for {}/{} carries no sequence number", index, id),
        })?;

        Ok(Some(StoredDocument {
            index: body["_index"].as_str().unwrap_or(index).to_string(),
            id: id.to_string(),
            version,
            doc_version: body["_version"].as_i64().unwrap_or(0),
            source: body.get("_source").cloned(),
        }))
    }

    async fn index(&self, index: &str, request: IndexRequest) -> Result<WriteAck> {
        debug!(
            "Indexing document {} in index {} ({:?}, if_version={:?})",
            request.id, index, request.mode, request.if_version
        );

        let mut call = self
            .client
            .index(IndexParts::IndexId(index, &request.id))
            .body(request.source);

        if request.mode == WriteMode::Create {
            call = call.op_type(OpType::Create);
        }
        if let Some(version) = request.if_version {
            call = call
                .if_seq_no(version.seq_no)
                .if_primary_term(version.primary_term);
        }
        if request.refresh {
            call = call.refresh(Refresh::WaitFor);
        }

        let body = read_body(call.send().await?, index, &request.id).await?;
        write_ack(&body, index, &request.id, WriteResult::Updated)
    }

    async fn delete(&self, index: &str, request: DeleteRequest) -> Result<WriteAck> {
        debug!("Deleting document {} from index {}", request.id, index);

        let mut call = self.client.delete(DeleteParts::IndexId(index, &request.id));

        if let Some(version) = request.if_version {
            call = call
                .if_seq_no(version.seq_no)
                .if_primary_term(version.primary_term);
        }
        if request.refresh {
            call = call.refresh(Refresh::WaitFor);
        }

        let body = read_body(call.send().await?, index, &request.id).await?;
        write_ack(&body, index, &request.id, WriteResult::Deleted)
    }

    async fn bulk(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: bool,
    ) -> Result<Vec<BulkItemResponse>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Bulk request with {} actions on index {}", actions.len(), index);

        let body: Vec<JsonBody<Value>> = actions
            .iter()
            .flat_map(|action| action.to_lines(index))
            .map(JsonBody::from)
            .collect();

        let mut call = self.client.bulk(BulkParts::None).body(body);
        if refresh {
            call = call.refresh(Refresh::WaitFor);
        }

        let response = call.send().await?;
        let status = response.status_code();
        let result: Value = response.json().await?;

        if !status.is_success() {
            return Err(RepositoryError::from_status(
                status.as_u16(),
                error_reason(&result),
                index,
                "_bulk",
            ));
        }

        result["items"]
            .as_array()
            .map(|items| items.iter().map(BulkItemResponse::from_json).collect())
            .unwrap_or_else(|| {
                Err(RepositoryError::Server {
                    status: 500,
                    reason: "bulk response has no items".to_string(),
                })
            })
    }

    async fn search(
        &self,
        index: &str,
        body: Value,
        scroll: Option<Duration>,
    ) -> Result<SearchResponse> {
        debug!("Searching index {} (scroll={:?})", index, scroll);

        let keep_alive = scroll.map(keep_alive_param);
        let indices = [index];
        let mut call = self
            .client
            .search(SearchParts::Index(&indices))
            .seq_no_primary_term(true)
            .body(body);

        if let Some(keep_alive) = keep_alive.as_deref() {
            call = call.scroll(keep_alive);
        }

        let body = read_body(call.send().await?, index, "_search").await?;
        Ok(SearchResponse::from_json(&body))
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        debug!("Fetching next scroll page");

        let response = self
            .client
            .scroll(ScrollParts::None)
            .body(json!({
                "scroll": keep_alive_param(keep_alive),
                "scroll_id": scroll_id,
            }))
            .send()
            .await?;

        let body = read_body(response, "_scroll", scroll_id).await?;
        Ok(SearchResponse::from_json(&body))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        debug!("Releasing scroll context");

        let response = self
            .client
            .clear_scroll(ClearScrollParts::None)
            .body(json!({ "scroll_id": [scroll_id] }))
            .send()
            .await?;

        // An expired cursor is already released.
        if response.status_code() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        read_body(response, "_scroll", scroll_id).await.map(|_| ())
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        debug!("Refreshing index {}", index);

        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .send()
            .await?;

        read_body(response, index, "_refresh").await.map(|_| ())
    }

    async fn count(&self, index: &str, query: Value) -> Result<u64> {
        let response = self
            .client
            .count(CountParts::Index(&[index]))
            .body(json!({ "query": query }))
            .send()
            .await?;

        let body = read_body(response, index, "_count").await?;
        Ok(body["count"].as_u64().unwrap_or(0))
    }
}

impl std::fmt::Debug for OpenSearchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSearchStore")
            .field("urls", &self.config.urls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reason() {
        let body = json!({ "error": { "type": "mapper_parsing_exception", "reason": "failed to parse" } });
        assert_eq!(error_reason(&body), "mapper_parsing_exception: failed to parse");
        assert_eq!(error_reason(&json!({ "error": "boom" })), "boom");
        assert_eq!(error_reason(&json!({ "result": "not_found" })), "not_found");
    }

    #[test]
    fn test_write_ack_requires_seq_no() {
        let ack = write_ack(
            &json!({ "_index": "a", "_id": "1", "_version": 3, "result": "created",
                     "_seq_no": 9, "_primary_term": 1 }),
            "a",
            "1",
            WriteResult::Updated,
        )
        .unwrap();
        assert_eq!(ack.result, WriteResult::Created);
        assert_eq!(ack.doc_version, 3);

        assert!(write_ack(&json!({ "_id": "1" }), "a", "1", WriteResult::Updated).is_err());
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let err = OpenSearchStore::new(OpenSearchConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, RepositoryError::Config(_)));
    }

    #[test]
    fn test_new_builds_without_connecting() {
        let store = OpenSearchStore::new(
            OpenSearchConfig::new("http://localhost:9200").with_basic_auth("admin", "admin"),
        )
        .unwrap();
        assert!(format!("{:?}", store).contains("localhost:9200"));
    }
}
