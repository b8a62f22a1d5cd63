//! Password resolution for the users a manifest declares.

use std::collections::BTreeMap;
use std::env;

use crate::error::{BootstrapError, Result};
use crate::manifest::Manifest;

/// Resolved passwords keyed by user name.
///
/// A manifest only names the environment variable carrying each password;
/// the values are pulled here, before any database call, so a missing
/// variable fails the run up front.
#[derive(Debug, Default)]
pub struct Secrets {
    passwords: BTreeMap<String, String>,
}

impl Secrets {
    /// Resolve every declared user's password from the process environment.
    pub fn from_env(manifest: &Manifest) -> Result<Self> {
        Self::resolve(manifest, |var| env::var(var).ok())
    }

    /// Resolve through an arbitrary lookup. Tests use this to avoid
    /// touching the real environment.
    pub fn resolve<F>(manifest: &Manifest, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut passwords = BTreeMap::new();
        for user in &manifest.users {
            let password = lookup(&user.password_env).ok_or_else(|| {
                BootstrapError::invalid(format!(
                    "environment variable '{}' for user '{}' is not set",
                    user.password_env, user.name
                ))
            })?;
            passwords.insert(user.name.clone(), password);
        }
        Ok(Self { passwords })
    }

    pub fn password_for(&self, user: &str) -> Option<&str> {
        self.passwords.get(user).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{RoleGrant, UserSpec};

    fn manifest_with_user() -> Manifest {
        Manifest {
            database: None,
            users: vec![UserSpec {
                name: "lms_app_user".into(),
                password_env: "LMS_APP_PASSWORD".into(),
                roles: vec![RoleGrant {
                    role: "readWrite".into(),
                    db: "lms_mongo_db".into(),
                }],
            }],
            collections: Vec::new(),
            indexes: Vec::new(),
        }
    }

    #[test]
    fn resolves_through_the_lookup() {
        let manifest = manifest_with_user();
        let secrets = Secrets::resolve(&manifest, |var| {
            (var == "LMS_APP_PASSWORD").then(|| "hunter2".to_string())
        })
        .unwrap();
        assert_eq!(secrets.password_for("lms_app_user"), Some("hunter2"));
        assert_eq!(secrets.password_for("nobody"), None);
    }

    #[test]
    fn missing_variable_fails_before_any_database_call() {
        let manifest = manifest_with_user();
        let err = Secrets::resolve(&manifest, |_| None).unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidSpec { .. }));
        assert!(err.to_string().contains("LMS_APP_PASSWORD"));
    }
}
