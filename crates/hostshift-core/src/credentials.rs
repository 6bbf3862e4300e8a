use std::fmt;

use anyhow::anyhow;

/// Credentials accepted by the entitlement service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    ActivationKey { org: String, key: String },
}

impl Credentials {
    /// Builds credentials from the optional values collected from flags and the
    /// config file. Returns `Ok(None)` when nothing was supplied.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        org: Option<String>,
        activation_key: Option<String>,
    ) -> anyhow::Result<Option<Self>> {
        match (username, password, org, activation_key) {
            (None, None, None, None) => Ok(None),
            (_, _, Some(org), Some(key)) => {
                if org.trim().is_empty() || key.trim().is_empty() {
                    return Err(anyhow!("organization and activation key must not be empty"));
                }
                Ok(Some(Self::ActivationKey { org, key }))
            }
            (None, None, org, key) => Err(anyhow!(
                "activation key registration requires both --org and --activation-key (org={}, key={})",
                presence(org.is_some()),
                presence(key.is_some())
            )),
            (Some(username), Some(password), _, _) => {
                if username.trim().is_empty() {
                    return Err(anyhow!("username must not be empty"));
                }
                Ok(Some(Self::Password { username, password }))
            }
            (username, password, _, _) => Err(anyhow!(
                "password registration requires both --username and --password (username={}, password={})",
                presence(username.is_some()),
                presence(password.is_some())
            )),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Password { .. } => "username/password",
            Self::ActivationKey { .. } => "activation key",
        }
    }
}

fn presence(given: bool) -> &'static str {
    if given {
        "given"
    } else {
        "missing"
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::ActivationKey { org, .. } => f
                .debug_struct("ActivationKey")
                .field("org", org)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}
