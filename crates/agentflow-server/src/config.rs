use std::path::PathBuf;

/// Process-wide configuration, read once from the environment at startup.
/// Every field has a default so the server can be started with no
/// environment at all for local development and tests.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub auth_secret: Option<String>,
    pub allowed_email_domains: Vec<String>,
    pub public_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3333);
        let db_path = std::env::var("AGENT_FLOW_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        let auth_secret = std::env::var("BETTER_AUTH_SECRET").ok();
        let allowed_email_domains = std::env::var("ALLOWED_EMAIL_DOMAINS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let public_url = std::env::var("AGENT_FLOW_URL").ok();

        Self {
            port,
            db_path,
            auth_secret,
            allowed_email_domains,
            public_url,
        }
    }
}

const DEFAULT_DB_PATH: &str = "agent-flow.db";

#[cfg(test)]
mod tests {
    use super::*;

    // SAFETY: `cargo test` runs this crate's tests in one process, and no
    // other test in this crate reads or writes these vars, so clearing and
    // restoring them here does not race.
    fn with_cleared_env<T>(f: impl FnOnce() -> T) -> T {
        let vars = [
            "PORT",
            "AGENT_FLOW_DB",
            "BETTER_AUTH_SECRET",
            "ALLOWED_EMAIL_DOMAINS",
            "AGENT_FLOW_URL",
        ];
        let saved: Vec<_> = vars.iter().map(|v| (*v, std::env::var(v).ok())).collect();
        for v in vars {
            std::env::remove_var(v);
        }
        let result = f();
        for (v, value) in saved {
            match value {
                Some(value) => std::env::set_var(v, value),
                None => std::env::remove_var(v),
            }
        }
        result
    }

    #[test]
    fn defaults_when_unset() {
        let config = with_cleared_env(AppConfig::from_env);
        assert_eq!(config.port, 3333);
        assert_eq!(config.db_path, PathBuf::from("agent-flow.db"));
        assert_eq!(config.auth_secret, None);
        assert!(config.allowed_email_domains.is_empty());
        assert_eq!(config.public_url, None);
    }

    #[test]
    fn reads_db_path_override() {
        with_cleared_env(|| {
            std::env::set_var("AGENT_FLOW_DB", "/tmp/custom.db");
            let config = AppConfig::from_env();
            assert_eq!(config.db_path, PathBuf::from("/tmp/custom.db"));
        });
    }

    #[test]
    fn parses_comma_list() {
        let domains = "acme.com, example.org,,foo.io"
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        assert_eq!(domains, vec!["acme.com", "example.org", "foo.io"]);
    }
}
