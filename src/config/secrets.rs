//! Secret handling utilities.
//!
//! Re-exports secrecy types and builds the bearer header value for the
//! remote API without ever formatting the token through `Debug`.

pub use secrecy::{ExposeSecret, SecretString};

/// `Authorization` header value for a bearer token.
pub fn bearer_header(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_prefixes_token() {
        let token = SecretString::from("abc123".to_string());
        assert_eq!(bearer_header(&token), "Bearer abc123");
        assert!(!format!("{token:?}").contains("abc123"));
    }
}
