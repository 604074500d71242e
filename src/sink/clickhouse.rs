use super::{AnalyticsRow, AnalyticsStore, StoreError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// ClickHouse HTTP interface, one `INSERT ... FORMAT JSONEachRow` per batch.
pub struct ClickHouseStore {
    http_client: Client,
    url: String,
    table: String,
}

impl ClickHouseStore {
    pub fn new(url: impl Into<String>, table: impl Into<String>, request_timeout: Duration) -> Result<Self, StoreError> {
        let http_client = Client::builder()
            .user_agent("nearyou/0.1")
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http_client,
            url: url.into().trim_end_matches('/').to_string(),
            table: table.into(),
        })
    }

    fn insert_query(&self) -> String {
        format!("INSERT INTO {} FORMAT JSONEachRow", self.table)
    }
}

/// Newline-delimited JSON body.
pub(super) fn encode_rows(batch: &[AnalyticsRow]) -> Result<Vec<u8>, StoreError> {
    let mut body = Vec::with_capacity(batch.len() * 256);
    for row in batch {
        serde_json::to_writer(&mut body, row)?;
        body.push(b'\n');
    }
    Ok(body)
}

#[async_trait]
impl AnalyticsStore for ClickHouseStore {
    async fn append(&self, batch: &[AnalyticsRow]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let response = self
            .http_client
            .post(format!("{}/", self.url))
            .query(&[("query", self.insert_query())])
            .body(encode_rows(batch)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "clickhouse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn row(seq: u64) -> AnalyticsRow {
        AnalyticsRow {
            event_id: format!("evt-{}", seq),
            event_time: "2024-02-11 16:20:00.000".to_string(),
            user_id: "user_1".to_string(),
            sequence_no: seq,
            latitude: 45.46,
            longitude: 9.19,
            poi_range: 0.0,
            poi_name: String::new(),
            poi_info: String::new(),
            message_source: String::new(),
            partition: 0,
        }
    }

    #[tokio::test]
    async fn test_append_posts_json_each_row() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                "INSERT INTO user_events FORMAT JSONEachRow".into(),
            ))
            .match_body(Matcher::Regex(r#"(?s)"sequence_no":1.*\n.*"sequence_no":2"#.to_string()))
            .with_status(200)
            .create_async()
            .await;

        let store = ClickHouseStore::new(server.url(), "user_events", Duration::from_secs(5)).unwrap();
        store.append(&[row(1), row(2)]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_append_reports_server_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("Code: 60. Table does not exist")
            .create_async()
            .await;

        let store = ClickHouseStore::new(server.url(), "user_events", Duration::from_secs(5)).unwrap();
        match store.append(&[row(1)]).await {
            Err(StoreError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("Table does not exist"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_encode_rows_is_newline_delimited() {
        let body = encode_rows(&[row(1), row(2)]).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }
}
