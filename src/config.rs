// ⚙️ Configuration - CORTA_MATO_* environment variables with typed defaults

use crate::dorsal::TokenMode;
use std::env;
use std::path::PathBuf;
use subtle::ConstantTimeEq;

pub const ENV_PREFIX: &str = "CORTA_MATO_";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root for every file the system writes
    pub data_dir: PathBuf,
    /// SQLite ledger file
    pub db_path: PathBuf,
    /// Roster CSV exported from the school spreadsheet
    pub roster_path: PathBuf,
    /// Rendered dorsal images
    pub dorsal_dir: PathBuf,
    /// Optional JSON category table for this edition
    pub category_table: Option<PathBuf>,
    pub token_mode: TokenMode,
    /// Shared secret for admin operations over HTTP; None disables them
    pub admin_token: Option<String>,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::with_data_dir(PathBuf::from("data"))
    }
}

impl Config {
    /// Default layout under `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            db_path: data_dir.join("inscricoes.db"),
            roster_path: data_dir.join("alunos.csv"),
            dorsal_dir: data_dir.join("dorsais"),
            data_dir,
            category_table: None,
            token_mode: TokenMode::Descriptive,
            admin_token: None,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any key lookup (environment, tests)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data"));
        let mut config = Config::with_data_dir(data_dir);

        if let Some(v) = get("DB") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("ROSTER") {
            config.roster_path = PathBuf::from(v);
        }
        if let Some(v) = get("DORSAL_DIR") {
            config.dorsal_dir = PathBuf::from(v);
        }
        config.category_table = get("CATEGORY_TABLE").map(PathBuf::from);
        config.admin_token = get("ADMIN_TOKEN");
        if let Some(v) = get("BIND") {
            config.bind_addr = v;
        }

        // An arrival base URL switches dorsais to finish-line URLs
        if let Some(base_url) = get("ARRIVAL_URL") {
            config.token_mode = TokenMode::ArrivalUrl { base_url };
        }

        config
    }

    /// Constant-time comparison against the configured admin token
    pub fn is_admin_token(&self, presented: Option<&str>) -> bool {
        match (&self.admin_token, presented) {
            (Some(expected), Some(given)) => bool::from(expected.as_bytes().ct_eq(given.as_bytes())),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[]));

        assert_eq!(config.db_path, PathBuf::from("data/inscricoes.db"));
        assert_eq!(config.dorsal_dir, PathBuf::from("data/dorsais"));
        assert_eq!(config.token_mode, TokenMode::Descriptive);
        assert_eq!(config.admin_token, None);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("CORTA_MATO_DATA_DIR", "/srv/prova"),
            ("CORTA_MATO_ROSTER", "/srv/alunos.csv"),
            ("CORTA_MATO_ADMIN_TOKEN", "segredo"),
            ("CORTA_MATO_ARRIVAL_URL", "http://meta.local/chegada"),
            ("CORTA_MATO_BIND", " "),
        ]));

        assert_eq!(config.db_path, PathBuf::from("/srv/prova/inscricoes.db"));
        assert_eq!(config.roster_path, PathBuf::from("/srv/alunos.csv"));
        assert_eq!(config.admin_token.as_deref(), Some("segredo"));
        assert_eq!(
            config.token_mode,
            TokenMode::ArrivalUrl { base_url: "http://meta.local/chegada".to_string() }
        );
        // Blank values fall back to defaults
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_admin_token_check() {
        let mut config = Config::default();
        assert!(!config.is_admin_token(Some("x")));

        config.admin_token = Some("segredo".to_string());
        assert!(config.is_admin_token(Some("segredo")));
        assert!(!config.is_admin_token(Some("segredO")));
        assert!(!config.is_admin_token(Some("seg")));
        assert!(!config.is_admin_token(Some("segredo2")));
        assert!(!config.is_admin_token(Some("")));
        assert!(!config.is_admin_token(None));
    }
}
