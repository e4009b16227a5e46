use crate::error::TransferError;
use secrecy::SecretString;

/// Username / password / one-time-code triple for keyboard-interactive logins.
pub struct LoginCredentials {
    pub username: String,
    pub password: SecretString,
    pub totp: SecretString,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Just-in-time credential lookups keyed by hostname.
///
/// Every method fails with `MissingCredential` when the store has nothing
/// usable for the key. Implementations must not cache secrets on disk.
pub trait CredentialStore: Send + Sync {
    fn login(&self, host: &str) -> Result<LoginCredentials, TransferError>;

    fn password(&self, host: &str) -> Result<SecretString, TransferError>;

    /// Passphrase for the encrypted private key used to reach `host`.
    fn key_passphrase(&self, host: &str) -> Result<SecretString, TransferError>;
}
