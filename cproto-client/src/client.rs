//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::error::ClientError;
use cproto_protocol::{args, Args, CmdCode, Variant};
use serde::Serialize;
use std::sync::Arc;

/// A batch of query results: the raw encoded rows plus the server-side
/// cursor they belong to.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResults {
    /// Encoded result rows, as produced by the server.
    pub raw: Vec<u8>,
    /// Server cursor id, `None` when the server closed the cursor already.
    pub query_id: Option<i64>,
}

impl QueryResults {
    fn from_args(args: Args) -> Self {
        let raw = match args.first() {
            Some(Variant::Bytes(b)) => b.clone(),
            Some(Variant::String(s)) => s.clone().into_bytes(),
            _ => Vec::new(),
        };
        let query_id = args.get(1).and_then(Variant::as_i64).filter(|id| *id >= 0);
        Self { raw, query_id }
    }
}

/// High-level client for cproto servers.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Creates a client from a loaded [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.to_connection_config())
    }

    /// Connects and logs in.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Fails the connection and every outstanding call.
    pub fn terminate(&self) {
        self.conn.terminate()
    }

    /// Number of calls in flight.
    pub fn pending_calls(&self) -> usize {
        self.conn.pending_calls()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn request(&self, command: CmdCode, args: Args) -> Result<Args, ClientError> {
        let timeout = self.conn.config().request_timeout;
        let answer = self.conn.call(command, timeout, &args).await?;
        answer.args(0)
    }

    /// Issues an arbitrary call with the default request timeout.
    pub async fn call(&self, command: CmdCode, args: Args) -> Result<Args, ClientError> {
        self.request(command, args).await
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Pings the server.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request(CmdCode::Ping, args![]).await?;
        Ok(())
    }

    /// Opens (and optionally creates) a database on the server.
    pub async fn open_database(&self, name: &str, create_if_missing: bool) -> Result<(), ClientError> {
        self.request(CmdCode::OpenDatabase, args![name, create_if_missing])
            .await?;
        Ok(())
    }

    // =========================================================================
    // Namespace operations
    // =========================================================================

    /// Opens a namespace. `definition` is the namespace definition JSON.
    pub async fn open_namespace(&self, definition: &str) -> Result<(), ClientError> {
        self.request(CmdCode::OpenNamespace, args![definition]).await?;
        Ok(())
    }

    pub async fn close_namespace(&self, name: &str) -> Result<(), ClientError> {
        self.request(CmdCode::CloseNamespace, args![name]).await?;
        Ok(())
    }

    pub async fn drop_namespace(&self, name: &str) -> Result<(), ClientError> {
        self.request(CmdCode::DropNamespace, args![name]).await?;
        Ok(())
    }

    /// Lists namespaces. Returns the server's JSON description.
    pub async fn enum_namespaces(&self) -> Result<String, ClientError> {
        let result = self.request(CmdCode::EnumNamespaces, args![]).await?;
        Ok(first_string(&result))
    }

    /// Commits pending changes of a namespace.
    pub async fn commit(&self, namespace: &str) -> Result<(), ClientError> {
        self.request(CmdCode::Commit, args![namespace]).await?;
        Ok(())
    }

    // =========================================================================
    // Query operations
    // =========================================================================

    /// Runs an SQL query.
    pub async fn select_sql(
        &self,
        query: &str,
        flags: i32,
        fetch_limit: i32,
    ) -> Result<QueryResults, ClientError> {
        let result = self
            .request(CmdCode::SelectSql, args![query, flags, fetch_limit])
            .await?;
        Ok(QueryResults::from_args(result))
    }

    /// Fetches the next batch of an open cursor.
    pub async fn fetch_results(
        &self,
        query_id: i64,
        flags: i32,
        offset: i32,
        limit: i32,
    ) -> Result<QueryResults, ClientError> {
        let result = self
            .request(CmdCode::FetchResults, args![query_id, flags, offset, limit])
            .await?;
        Ok(QueryResults::from_args(result))
    }

    /// Releases a server-side cursor.
    pub async fn close_results(&self, query_id: i64) -> Result<(), ClientError> {
        self.request(CmdCode::CloseResults, args![query_id]).await?;
        Ok(())
    }

    // =========================================================================
    // Item operations
    // =========================================================================

    /// Inserts, updates, upserts or deletes an item.
    pub async fn modify_item(
        &self,
        namespace: &str,
        format: i32,
        item: &[u8],
        mode: i32,
    ) -> Result<QueryResults, ClientError> {
        let result = self
            .request(CmdCode::ModifyItem, args![namespace, format, item, mode])
            .await?;
        Ok(QueryResults::from_args(result))
    }

    // =========================================================================
    // Meta operations
    // =========================================================================

    pub async fn get_meta(&self, namespace: &str, key: &str) -> Result<String, ClientError> {
        let result = self.request(CmdCode::GetMeta, args![namespace, key]).await?;
        Ok(first_string(&result))
    }

    pub async fn put_meta(&self, namespace: &str, key: &str, data: &str) -> Result<(), ClientError> {
        self.request(CmdCode::PutMeta, args![namespace, key, data])
            .await?;
        Ok(())
    }

    pub async fn enum_meta(&self, namespace: &str) -> Result<Vec<String>, ClientError> {
        let result = self.request(CmdCode::EnumMeta, args![namespace]).await?;
        Ok(result
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }
}

fn first_string(args: &Args) -> String {
    match args.first() {
        Some(Variant::String(s)) => s.clone(),
        Some(Variant::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_results_from_args() {
        let results = QueryResults::from_args(args![Variant::Bytes(vec![1, 2, 0xFF]), 7]);
        assert_eq!(results.raw, vec![1, 2, 0xFF]);
        assert_eq!(results.query_id, Some(7));

        let closed = QueryResults::from_args(args!["rows", -1]);
        assert_eq!(closed.raw, b"rows".to_vec());
        assert_eq!(closed.query_id, None);

        let empty = QueryResults::from_args(args![]);
        assert!(empty.raw.is_empty());
        assert_eq!(empty.query_id, None);
    }

    #[test]
    fn test_first_string() {
        assert_eq!(first_string(&args!["[]"]), "[]");
        assert_eq!(first_string(&args![]), "");
    }

    #[tokio::test]
    async fn test_terminated_client_fails_fast() {
        let client = Client::new(ConnectionConfig::new("127.0.0.1:1".parse().unwrap()));
        client.terminate();
        assert_eq!(client.state(), ConnectionState::Failed);
        let err = client.ping().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(client.pending_calls(), 0);
    }
}
