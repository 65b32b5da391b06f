//! CLI configuration

#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the canary server
    pub server_url: String,
}
