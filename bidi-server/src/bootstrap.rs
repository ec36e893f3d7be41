//! First-start provisioning: the server's RSA identity and the
//! administrator with its credential bundle.

use crate::error::ServerError;
use bidi_protocol::bundle::DEFAULT_CLIENT_TIMEOUT_SECS;
use bidi_protocol::{ClientConfiguration, KeyPair, TextKey, TextProperty, ADMIN_USER_ID};
use bidi_storage::{ServerDataLayout, StoredUser, UserStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerKeysFile {
    server_private_key: String,
    server_public_key: String,
}

/// Loads the server key pair, generating and storing one on first start.
pub fn load_or_create_server_keys(layout: &ServerDataLayout) -> Result<KeyPair, ServerError> {
    let path = layout.server_keys_path();

    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let file: ServerKeysFile = serde_json::from_str(&content)?;
        let keys = KeyPair::from_private_base64(&file.server_private_key)?;
        tracing::debug!("Loaded server keys from {}", path.display());
        return Ok(keys);
    }

    let keys = KeyPair::generate()?;
    let file = ServerKeysFile {
        server_private_key: keys.private_base64()?,
        server_public_key: keys.public_base64()?,
    };
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;
    tracing::info!(
        "{}",
        TextProperty::new(TextKey::FileCreated)
            .with_arg(path.display())
            .resolve()
    );
    Ok(keys)
}

/// What the administrator bundle is written with.
pub struct AdminBootstrap<'a> {
    pub url: &'a str,
    pub port: u16,
    pub admin_email: &'a str,
}

/// Creates the administrator if the user store has none. Returns the path of
/// the credential bundle written for it.
pub fn ensure_admin(
    layout: &ServerDataLayout,
    users: &UserStore,
    server_keys: &KeyPair,
    settings: AdminBootstrap<'_>,
) -> Result<Option<PathBuf>, ServerError> {
    if users.admin_exists() {
        return Ok(None);
    }

    tracing::info!("{}", TextProperty::new(TextKey::CreatingAdmin).resolve());

    let keys = KeyPair::generate()?;
    let mut admin = StoredUser::pending(ADMIN_USER_ID, "", BTreeMap::new(), "");
    admin.activate(keys.public_base64()?);
    users.put(&admin)?;

    let bundle = ClientConfiguration {
        user_id: ADMIN_USER_ID.to_string(),
        url: settings.url.to_string(),
        port: settings.port,
        timeout: DEFAULT_CLIENT_TIMEOUT_SECS,
        user_private_key: Some(keys.private_base64()?),
        server_public_key: server_keys.public_base64()?,
        admin_email: settings.admin_email.to_string(),
    };
    let path = layout.root().join(bundle.default_file_name());
    bundle.write_to_file(&path)?;

    tracing::info!(
        "{}",
        TextProperty::new(TextKey::FileCreated)
            .with_arg(path.display())
            .resolve()
    );
    Ok(Some(path))
}
