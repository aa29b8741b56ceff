//! SOCKS5 authenticators.
//!
//! Each authenticator owns the sub-exchange for one method code. The
//! registry mapping method code to authenticator is built once at server
//! startup from the inbound's user list.

use super::consts::*;
use crate::config::User;
use crate::error::SocksError;
use crate::inbound::AuthContext;
use crate::net::{StreamDyn, SOCKS5_VERSION};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Validates username/password pairs
pub trait CredentialStore: Debug + Send + Sync {
    /// Whether the pair is acceptable
    fn valid(&self, user: &str, pass: &str) -> bool;
}

/// Credential store backed by the configured user list
#[derive(Debug, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    /// Build from configured users; a missing password counts as empty
    pub fn from_users(users: &[User]) -> Self {
        StaticCredentials {
            users: users
                .iter()
                .map(|u| (u.user_name.clone(), u.password.clone().unwrap_or_default()))
                .collect(),
        }
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, user: &str, pass: &str) -> bool {
        self.users.get(user).map(String::as_str) == Some(pass)
    }
}

/// One SOCKS5 authentication method
#[async_trait]
pub trait Authenticator: Debug + Send + Sync {
    /// Method code advertised to clients
    fn method(&self) -> u8;

    /// Run the method's sub-exchange, starting with the method-selection
    /// reply. Returns the negotiated context on success.
    async fn authenticate(&self, conn: &mut dyn StreamDyn) -> Result<AuthContext>;
}

/// The "no authentication required" method
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn method(&self) -> u8 {
        AUTH_METHOD_NONE
    }

    async fn authenticate(&self, conn: &mut dyn StreamDyn) -> Result<AuthContext> {
        conn.write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE]).await?;
        conn.flush().await?;
        Ok(AuthContext::new(AUTH_METHOD_NONE))
    }
}

/// Username/password authentication (RFC 1929)
#[derive(Debug)]
pub struct UserPassAuth {
    credentials: Box<dyn CredentialStore>,
}

impl UserPassAuth {
    /// Create with an injected credential store
    pub fn new(credentials: Box<dyn CredentialStore>) -> Self {
        UserPassAuth { credentials }
    }
}

#[async_trait]
impl Authenticator for UserPassAuth {
    fn method(&self) -> u8 {
        AUTH_METHOD_PASSWORD
    }

    async fn authenticate(&self, conn: &mut dyn StreamDyn) -> Result<AuthContext> {
        conn.write_all(&[SOCKS5_VERSION, AUTH_METHOD_PASSWORD])
            .await?;
        conn.flush().await?;

        // VER ULEN U[ULEN] PLEN P[PLEN]
        let mut header = [0u8; 2];
        conn.read_exact(&mut header).await?;
        if header[0] != AUTH_VERSION {
            bail!("unsupported auth version: {}", header[0]);
        }

        let user_len = header[1] as usize;
        if user_len == 0 {
            return fail(conn).await;
        }
        let mut field = [0u8; MAX_AUTH_LEN];
        conn.read_exact(&mut field[..user_len]).await?;
        let user = String::from_utf8_lossy(&field[..user_len]).into_owned();

        let pass_len = conn.read_u8().await? as usize;
        if pass_len == 0 {
            return fail(conn).await;
        }
        conn.read_exact(&mut field[..pass_len]).await?;
        let pass = String::from_utf8_lossy(&field[..pass_len]).into_owned();

        if !self.credentials.valid(&user, &pass) {
            return fail(conn).await;
        }

        conn.write_all(&[AUTH_VERSION, AUTH_STATUS_SUCCESS]).await?;
        conn.flush().await?;

        let mut context = AuthContext::new(AUTH_METHOD_PASSWORD);
        context.attrs.insert("username".to_string(), user);
        Ok(context)
    }
}

async fn fail(conn: &mut dyn StreamDyn) -> Result<AuthContext> {
    conn.write_all(&[AUTH_VERSION, AUTH_STATUS_FAILURE]).await?;
    conn.flush().await?;
    Err(SocksError::AuthFailed.into())
}
