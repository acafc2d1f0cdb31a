use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};

/// One shared password. The login's user name is what bookings record as
/// `booked_by`, so a login without one is refused.
#[derive(Debug)]
pub struct LabDeskAuthSource {
    password: String,
}

impl LabDeskAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for LabDeskAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if login.user().is_none_or(|u| u.trim().is_empty()) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::UserNameRequired);
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
