//! REST client for the local `bw serve` HTTP API (Vault Management API).

use crate::bitwarden::types::*;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Client for the `bw serve` local REST API.
///
/// Requires a running, unlocked `bw serve` instance (default: localhost:8087).
#[derive(Debug, Clone)]
pub struct VaultApiClient {
    client: Client,
    base_url: String,
}

impl VaultApiClient {
    pub fn new(hostname: &str, port: u16, timeout: Duration) -> Result<Self, BitwardenError> {
        if hostname.trim().is_empty() {
            return Err(BitwardenError::invalid_config("bw serve hostname is empty"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BitwardenError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", hostname, port),
        })
    }

    pub fn from_config(config: &BitwardenConfig) -> Result<Self, BitwardenError> {
        Self::new(&config.serve_hostname, config.serve_port, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the API server is reachable.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/status", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// `GET /object/{field}/{item}`; returns the non-empty value.
    pub async fn get_field(&self, field: VaultField, item: &str) -> Result<String, BitwardenError> {
        let url = self.field_url(field, item);
        let resp = self.client.get(&url).send().await
            .map_err(|e| BitwardenError::network(format!("{} request for '{}' failed: {}", field, item, e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BitwardenError::not_found(format!("no {} stored for '{}'", field, item)));
        }
        if !status.is_success() {
            return Err(BitwardenError::api(format!("{} lookup for '{}' returned HTTP {}", field, item, status)));
        }

        let body: Value = resp.json().await
            .map_err(|e| BitwardenError::parse(format!("{} response parse error: {}", field, e)))?;
        extract_value(&body, field, item)
    }

    fn field_url(&self, field: VaultField, item: &str) -> String {
        format!("{}/object/{}/{}", self.base_url, field.as_path(), item)
    }
}

/// Pull `data.data` out of a `{ success, data: { object, data } }` payload.
fn extract_value(body: &Value, field: VaultField, item: &str) -> Result<String, BitwardenError> {
    if body.get("success").and_then(|v| v.as_bool()) != Some(true) {
        let msg = body.get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("request failed");
        return Err(if msg.to_lowercase().contains("locked") {
            BitwardenError::vault_locked(msg)
        } else if msg.to_lowercase().contains("not found") {
            BitwardenError::not_found(format!("no {} stored for '{}'", field, item))
        } else {
            BitwardenError::api(format!("{} lookup for '{}': {}", field, item, msg))
        });
    }

    let value = body.get("data")
        .and_then(|d| d.get("data"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if value.is_empty() {
        return Err(BitwardenError::not_found(format!("{} for '{}' is empty", field, item)));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn client(port: u16) -> VaultApiClient {
        VaultApiClient::new("127.0.0.1", port, Duration::from_secs(5)).unwrap()
    }

    /// Answer a single HTTP request with `status` and `body`; returns the port
    /// and a handle yielding the request line.
    fn one_shot_server(status: &'static str, body: String) -> (u16, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });
        (port, handle)
    }

    #[test]
    fn vault_api_client_from_config() {
        let config = BitwardenConfig::default();
        let client = VaultApiClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8087");
    }

    #[test]
    fn empty_hostname_is_rejected() {
        let err = VaultApiClient::new(" ", 8087, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind, BitwardenErrorKind::InvalidConfig);
    }

    #[test]
    fn field_url_shape() {
        let url = client(8087).field_url(VaultField::Totp, "login.cluster.org");
        assert_eq!(url, "http://127.0.0.1:8087/object/totp/login.cluster.org");
    }

    #[test]
    fn extract_value_reads_nested_data() {
        let body = json!({ "success": true, "data": { "object": "string", "data": "123456" } });
        assert_eq!(extract_value(&body, VaultField::Totp, "h").unwrap(), "123456");
    }

    #[test]
    fn extract_value_empty_is_not_found() {
        let body = json!({ "success": true, "data": { "object": "string", "data": "" } });
        let err = extract_value(&body, VaultField::Password, "h").unwrap_err();
        assert_eq!(err.kind, BitwardenErrorKind::NotFound);
    }

    #[test]
    fn extract_value_unsuccessful_payloads() {
        let locked = json!({ "success": false, "message": "Vault is locked." });
        assert_eq!(extract_value(&locked, VaultField::Password, "h").unwrap_err().kind, BitwardenErrorKind::VaultLocked);
        let missing = json!({ "success": false, "message": "Not found." });
        assert_eq!(extract_value(&missing, VaultField::Password, "h").unwrap_err().kind, BitwardenErrorKind::NotFound);
    }

    #[tokio::test]
    async fn get_field_over_http() {
        let body = json!({ "success": true, "data": { "object": "string", "data": "alice" } }).to_string();
        let (port, server) = one_shot_server("200 OK", body);
        let value = client(port).get_field(VaultField::Username, "login.cluster.org").await.unwrap();
        assert_eq!(value, "alice");
        let request_line = server.join().unwrap();
        assert_eq!(request_line, "GET /object/username/login.cluster.org HTTP/1.1");
    }

    #[tokio::test]
    async fn get_field_404_is_not_found() {
        let (port, server) = one_shot_server("404 Not Found", "{}".to_string());
        let err = client(port).get_field(VaultField::Password, "nohost").await.unwrap_err();
        assert_eq!(err.kind, BitwardenErrorKind::NotFound);
        server.join().unwrap();
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = client(port).get_field(VaultField::Password, "h").await.unwrap_err();
        assert_eq!(err.kind, BitwardenErrorKind::NetworkError);
    }
}
