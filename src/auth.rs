use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_ACTOR_LEN;

/// Shared-password login. The login user name is not checked against any
/// directory; it becomes the acting user recorded on every mutation, so it
/// only has to be present and bounded.
#[derive(Debug)]
pub struct ShelterBedAuthSource {
    password: String,
}

impl ShelterBedAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

fn check_login_user(user: Option<&str>) -> PgWireResult<()> {
    match user {
        Some(u) if !u.trim().is_empty() && u.len() <= MAX_ACTOR_LEN => Ok(()),
        _ => Err(PgWireError::UserError(Box::new(ErrorInfo::new(
            "FATAL".into(),
            "28000".into(),
            "a login user name is required".into(),
        )))),
    }
}

#[async_trait]
impl AuthSource for ShelterBedAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        check_login_user(login.user())?;
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_user_must_be_present() {
        assert!(check_login_user(Some("intake")).is_ok());
        assert!(check_login_user(None).is_err());
        assert!(check_login_user(Some("  ")).is_err());
        assert!(check_login_user(Some(&"u".repeat(MAX_ACTOR_LEN + 1))).is_err());
    }
}
