//! Gateway connection service - per-charity credentials through the vault

use std::sync::Arc;

use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::{Error, Result};
use crate::domain::{CredentialMode, GatewayConnection, GatewayCredentials};

use super::vault::CredentialVault;

/// Manages gateway connections
///
/// The vault secret is optional at construction so read-only commands work
/// without it; anything that seals or opens credentials needs it.
pub struct GatewayService {
    repository: Arc<DuckDbRepository>,
    secret: Option<String>,
}

impl GatewayService {
    pub fn new(repository: Arc<DuckDbRepository>, secret: Option<String>) -> Self {
        Self { repository, secret }
    }

    fn vault(&self) -> Result<CredentialVault> {
        CredentialVault::from_secret(self.secret.as_deref())
    }

    /// Seal credentials and make them the charity's only active connection
    pub fn activate(
        &self,
        charity_id: Uuid,
        mode: CredentialMode,
        credentials: &GatewayCredentials,
    ) -> Result<GatewayConnection> {
        if self.repository.get_charity(charity_id)?.is_none() {
            return Err(Error::not_found(format!("charity {}", charity_id)));
        }

        let sealed = self.vault()?.encrypt(credentials)?;
        let connection = GatewayConnection::new(charity_id, mode, sealed);
        self.repository.activate_connection(&connection)?;
        Ok(connection)
    }

    pub fn active_connection(&self, charity_id: Uuid) -> Result<Option<GatewayConnection>> {
        Ok(self.repository.get_active_connection(charity_id)?)
    }

    /// Every connection ever activated for the charity, newest first
    pub fn history(&self, charity_id: Uuid) -> Result<Vec<GatewayConnection>> {
        Ok(self.repository.list_connections(charity_id)?)
    }

    /// Open the active credentials for a charity
    pub fn load_credentials(&self, charity_id: Uuid) -> Result<GatewayCredentials> {
        let connection = self.active_connection(charity_id)?.ok_or_else(|| {
            Error::configuration(format!(
                "charity {} has no active gateway connection",
                charity_id
            ))
        })?;
        self.vault()?.decrypt(&connection.encrypted_credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewCharity;

    const SECRET: &str = "an operator secret value";

    fn setup(secret: Option<&str>) -> (GatewayService, Uuid) {
        let repo = Arc::new(DuckDbRepository::in_memory().unwrap());
        repo.ensure_schema().unwrap();
        let charity = NewCharity {
            name: "Hope Trust".to_string(),
            contact_email: "hope@example.org".to_string(),
            hmrc_ref: "AB123".to_string(),
            regulator_number: None,
        }
        .into_charity()
        .unwrap();
        repo.insert_charity(&charity).unwrap();
        (
            GatewayService::new(repo, secret.map(str::to_string)),
            charity.id,
        )
    }

    #[test]
    fn test_activate_then_load() {
        let (service, charity_id) = setup(Some(SECRET));
        let creds = GatewayCredentials::new("sender-1", "pw-1").unwrap();
        let connection = service
            .activate(charity_id, CredentialMode::CharityHeld, &creds)
            .unwrap();
        assert!(!connection.encrypted_credentials.contains("pw-1"));
        assert_eq!(service.load_credentials(charity_id).unwrap(), creds);
    }

    #[test]
    fn test_reactivation_leaves_one_active() {
        let (service, charity_id) = setup(Some(SECRET));
        let old = GatewayCredentials::new("sender-1", "pw-1").unwrap();
        let new = GatewayCredentials::new("sender-2", "pw-2").unwrap();
        service
            .activate(charity_id, CredentialMode::CharityHeld, &old)
            .unwrap();
        service
            .activate(charity_id, CredentialMode::CentrallyHeld, &new)
            .unwrap();

        let history = service.history(charity_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|c| c.is_active).count(), 1);
        assert_eq!(service.load_credentials(charity_id).unwrap(), new);
    }

    #[test]
    fn test_missing_connection_is_configuration_error() {
        let (service, charity_id) = setup(Some(SECRET));
        assert!(matches!(
            service.load_credentials(charity_id),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let (service, charity_id) = setup(None);
        let creds = GatewayCredentials::new("sender-1", "pw-1").unwrap();
        assert!(matches!(
            service.activate(charity_id, CredentialMode::CharityHeld, &creds),
            Err(Error::Configuration(_))
        ));
        assert!(service.active_connection(charity_id).unwrap().is_none());
    }

    #[test]
    fn test_unknown_charity_is_not_found() {
        let (service, _) = setup(Some(SECRET));
        let creds = GatewayCredentials::new("sender-1", "pw-1").unwrap();
        assert!(matches!(
            service.activate(Uuid::new_v4(), CredentialMode::CharityHeld, &creds),
            Err(Error::NotFound(_))
        ));
    }
}
