/// Gate for privileged session commands (bulk resets).
pub trait Authorizer: Send + Sync {
    fn validate(&self, credential: Option<&str>) -> bool;
}

/// Compares the credential against a configured admin token.
/// With no token configured every request is denied.
#[derive(Clone, Debug, Default)]
pub struct TokenAuthorizer {
    token: Option<String>,
}

impl TokenAuthorizer {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl Authorizer for TokenAuthorizer {
    fn validate(&self, credential: Option<&str>) -> bool {
        match (&self.token, credential) {
            (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
            _ => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
