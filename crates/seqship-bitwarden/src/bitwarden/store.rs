//! [`CredentialStore`] over the `bw serve` API.
//!
//! Lookups happen during SSH authentication, which is blocking code, so the
//! store owns a small current-thread runtime and drives the async client on
//! it. It must not be called from inside another tokio runtime.

use crate::bitwarden::api::VaultApiClient;
use crate::bitwarden::types::*;
use secrecy::SecretString;
use seqship_core::{CredentialStore, LoginCredentials, TransferError};
use tokio::runtime::{Builder, Runtime};

pub struct BitwardenCredentialStore {
    client: VaultApiClient,
    passphrase_item: Option<String>,
    runtime: Runtime,
}

impl std::fmt::Debug for BitwardenCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitwardenCredentialStore")
            .field("base_url", &self.client.base_url())
            .field("passphrase_item", &self.passphrase_item)
            .finish()
    }
}

impl BitwardenCredentialStore {
    pub fn new(config: &BitwardenConfig) -> Result<Self, BitwardenError> {
        let client = VaultApiClient::from_config(config)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BitwardenError::invalid_config(format!("cannot start vault client runtime: {}", e)))?;
        Ok(Self { client, passphrase_item: config.passphrase_item.clone(), runtime })
    }

    fn fetch(&self, field: VaultField, item: &str) -> Result<String, TransferError> {
        tracing::debug!(%field, item, "vault lookup");
        self.runtime
            .block_on(self.client.get_field(field, item))
            .map_err(|e| {
                TransferError::missing_credential(format!("vault has no usable {} for '{}'", field, item))
                    .with_source(e)
                    .log()
            })
    }
}

impl CredentialStore for BitwardenCredentialStore {
    fn login(&self, host: &str) -> Result<LoginCredentials, TransferError> {
        let username = self.fetch(VaultField::Username, host)?;
        let password = SecretString::new(self.fetch(VaultField::Password, host)?);
        let totp = SecretString::new(self.fetch(VaultField::Totp, host)?);
        Ok(LoginCredentials { username, password, totp })
    }

    fn password(&self, host: &str) -> Result<SecretString, TransferError> {
        self.fetch(VaultField::Password, host).map(SecretString::new)
    }

    fn key_passphrase(&self, host: &str) -> Result<SecretString, TransferError> {
        let item = self.passphrase_item.as_deref().unwrap_or(host);
        self.fetch(VaultField::Password, item).map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use seqship_core::TransferErrorKind;
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Answers `requests` connections with canned `data.data` values keyed by
    /// request path; unknown paths get 404.
    fn vault(values: HashMap<&'static str, &'static str>, requests: usize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for _ in 0..requests {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                let path = request.split_whitespace().nth(1).unwrap_or("").to_string();
                let (status, body) = match values.get(path.as_str()) {
                    Some(v) => ("200 OK", serde_json::json!({"success": true, "data": {"object": "string", "data": v}}).to_string()),
                    None => ("404 Not Found", "{}".to_string()),
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        port
    }

    fn store(port: u16, passphrase_item: Option<&str>) -> BitwardenCredentialStore {
        let config = BitwardenConfig {
            serve_hostname: "127.0.0.1".into(),
            serve_port: port,
            timeout_secs: 5,
            passphrase_item: passphrase_item.map(str::to_string),
        };
        BitwardenCredentialStore::new(&config).unwrap()
    }

    #[test]
    fn login_fetches_three_fields() {
        let port = vault(
            HashMap::from([
                ("/object/username/hpc.example.org", "alice"),
                ("/object/password/hpc.example.org", "s3cret"),
                ("/object/totp/hpc.example.org", "042917"),
            ]),
            3,
        );
        let login = store(port, None).login("hpc.example.org").unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.password.expose_secret(), "s3cret");
        assert_eq!(login.totp.expose_secret(), "042917");
    }

    #[test]
    fn passphrase_uses_fixed_item_when_configured() {
        let port = vault(HashMap::from([("/object/password/deploy-keys", "hunter2")]), 1);
        let pass = store(port, Some("deploy-keys")).key_passphrase("hpc.example.org").unwrap();
        assert_eq!(pass.expose_secret(), "hunter2");
    }

    #[test]
    fn missing_item_is_missing_credential() {
        let port = vault(HashMap::new(), 1);
        let err = store(port, None).password("nohost.example.org").unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::MissingCredential);
    }
}
