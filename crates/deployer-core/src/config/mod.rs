//! Configuration loading and validation.
//!
//! Sources, lowest priority first:
//! 1. deployer.toml (explicit `--config`, else `./deployer.toml`, else
//!    `<user config dir>/deployer/deployer.toml`)
//! 2. Environment variables (`GITLAB_WEBHOOK_TOKENS`, `TARGET_DIR`, ...)
//!
//! The result is a validated, immutable [`DeployerConfig`]. Components receive
//! it by reference and never look at the environment themselves.

pub mod parser;
pub mod schema;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use url::Url;

use crate::target::PathTemplate;

pub use parser::{parse_config_toml, parse_config_toml_str};
pub use schema::{ConfigFile, GitLabSection};

pub const CONFIG_FILE_NAME: &str = "deployer.toml";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_GITLAB_SERVER: &str = "https://gitlab.com";

/// Environment variable names, kept compatible with earlier deployments.
pub mod env {
    pub const LISTEN: &str = "DEPLOYER_LISTEN";
    pub const GITLAB_SERVER: &str = "GITLAB_SERVER";
    pub const GITLAB_API_TOKEN: &str = "GITLAB_API_TOKEN";
    pub const WEBHOOK_TOKENS: &str = "GITLAB_WEBHOOK_TOKENS";
    pub const TARGET_DIR: &str = "TARGET_DIR";
    pub const BUILD_NAME: &str = "BUILD_NAME";
    pub const STAGING_DIR: &str = "TMP_PATH";
    pub const RESPOND_WITH_BODY: &str = "DEPLOYER_RESPOND_WITH_BODY";
    pub const DEBUG: &str = "DEBUG";
}

#[derive(Debug, Clone)]
pub struct GitLabConfig {
    pub server: Url,
    pub api_token: String,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub listen: SocketAddr,
    pub gitlab: GitLabConfig,
    pub webhook_tokens: Vec<String>,
    pub target_dir: PathTemplate,
    pub build_name: Option<String>,
    pub staging_dir: PathBuf,
    pub respond_with_body: bool,
    pub debug: bool,
    /// Config file the values were read from, if any
    pub source: Option<PathBuf>,
}

impl DeployerConfig {
    /// Load from the discovered config file (if any) and the process
    /// environment.
    ///
    /// Runs before logging is set up, so it logs nothing itself; the chosen
    /// file is recorded in [`DeployerConfig::source`].
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    fn load_with(
        explicit: Option<&Path>,
        env_lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let source = discover_config_file(explicit)?;
        let file = match &source {
            Some(path) => parse_config_toml(path)?,
            None => ConfigFile::default(),
        };
        let mut config = Self::from_sources(file, env_lookup)?;
        config.source = source;
        Ok(config)
    }

    /// Merge a parsed file with environment lookups and validate the result.
    pub fn from_sources(
        mut file: ConfigFile,
        env_lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        apply_env_overrides(&mut file, &env_lookup)?;
        Self::validate(file)
    }

    fn validate(file: ConfigFile) -> anyhow::Result<Self> {
        let listen_raw = file.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
        let listen: SocketAddr = listen_raw
            .parse()
            .with_context(|| format!("Invalid listen address: {listen_raw}"))?;

        let server_raw = file
            .gitlab
            .server
            .as_deref()
            .unwrap_or(DEFAULT_GITLAB_SERVER);
        let server = Url::parse(server_raw)
            .with_context(|| format!("Invalid gitlab.server URL: {server_raw}"))?;
        if !matches!(server.scheme(), "http" | "https") {
            anyhow::bail!("gitlab.server must be an http(s) URL: {server_raw}");
        }

        let api_token = file
            .gitlab
            .api_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "gitlab.api_token is required (or set {})",
                    env::GITLAB_API_TOKEN
                )
            })?;

        let webhook_tokens: Vec<String> = file
            .webhook_tokens
            .into_iter()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();
        if webhook_tokens.is_empty() {
            anyhow::bail!(
                "webhook_tokens must contain at least one token (or set {})",
                env::WEBHOOK_TOKENS
            );
        }

        let template_raw = file.target_dir.ok_or_else(|| {
            anyhow::anyhow!("target_dir is required (or set {})", env::TARGET_DIR)
        })?;
        let target_dir = PathTemplate::parse(&template_raw)
            .with_context(|| format!("Invalid target_dir template: {template_raw}"))?;

        let staging_dir = file
            .staging_dir
            .map(PathBuf::from)
            .unwrap_or_else(default_staging_dir);
        if !staging_dir.is_absolute() {
            anyhow::bail!(
                "staging_dir must be an absolute path: {}",
                staging_dir.display()
            );
        }

        let build_name = file.build_name.filter(|name| !name.is_empty());

        Ok(Self {
            listen,
            gitlab: GitLabConfig { server, api_token },
            webhook_tokens,
            target_dir,
            build_name,
            staging_dir,
            respond_with_body: file.respond_with_body.unwrap_or(true),
            debug: file.debug.unwrap_or(false),
            source: None,
        })
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("deployer")
}

fn apply_env_overrides(
    file: &mut ConfigFile,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(value) = env_lookup(env::LISTEN) {
        file.listen = Some(value);
    }
    if let Some(value) = env_lookup(env::GITLAB_SERVER) {
        file.gitlab.server = Some(value);
    }
    if let Some(value) = env_lookup(env::GITLAB_API_TOKEN) {
        file.gitlab.api_token = Some(value);
    }
    if let Some(value) = env_lookup(env::WEBHOOK_TOKENS) {
        file.webhook_tokens = value.split(',').map(str::to_string).collect();
    }
    if let Some(value) = env_lookup(env::TARGET_DIR) {
        file.target_dir = Some(value);
    }
    if let Some(value) = env_lookup(env::BUILD_NAME) {
        file.build_name = Some(value);
    }
    if let Some(value) = env_lookup(env::STAGING_DIR) {
        file.staging_dir = Some(value);
    }
    if let Some(value) = env_lookup(env::RESPOND_WITH_BODY) {
        file.respond_with_body = Some(parse_bool(env::RESPOND_WITH_BODY, &value)?);
    }
    if let Some(value) = env_lookup(env::DEBUG) {
        file.debug = Some(parse_bool(env::DEBUG, &value)?);
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{key} must be a boolean, got {other:?}"),
    }
}

/// Pick the config file to read, if any.
///
/// An explicit path must exist; the implicit locations are optional.
pub fn discover_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(Some(local));
    }

    Ok(dirs::config_dir()
        .map(|dir| dir.join("deployer").join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal_env() -> Vec<(&'static str, &'static str)> {
        vec![
            (env::GITLAB_API_TOKEN, "glpat-1"),
            (env::WEBHOOK_TOKENS, "alpha, beta,,"),
            (env::TARGET_DIR, "/srv/www/{slug_project_name}"),
        ]
    }

    #[test]
    fn env_only_config_uses_defaults() {
        let config = DeployerConfig::from_sources(ConfigFile::default(), env_of(&minimal_env()))
            .unwrap();

        assert_eq!(config.listen, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.gitlab.server.as_str(), "https://gitlab.com/");
        assert_eq!(config.webhook_tokens, vec!["alpha", "beta"]);
        assert_eq!(config.target_dir.as_str(), "/srv/www/{slug_project_name}");
        assert_eq!(config.staging_dir, std::env::temp_dir().join("deployer"));
        assert!(config.respond_with_body);
        assert!(!config.debug);
        assert!(config.build_name.is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let file = parse_config_toml_str(
            r#"
webhook_tokens = ["from-file"]
target_dir = "/srv/file/{build.id}"
debug = false

[gitlab]
api_token = "file-token"
"#,
        )
        .unwrap();

        let config = DeployerConfig::from_sources(
            file,
            env_of(&[(env::WEBHOOK_TOKENS, "from-env"), (env::DEBUG, "true")]),
        )
        .unwrap();

        assert_eq!(config.webhook_tokens, vec!["from-env"]);
        assert_eq!(config.gitlab.api_token, "file-token");
        assert_eq!(config.target_dir.as_str(), "/srv/file/{build.id}");
        assert!(config.debug);
    }

    #[test]
    fn missing_required_values_fail() {
        for missing in [env::GITLAB_API_TOKEN, env::WEBHOOK_TOKENS, env::TARGET_DIR] {
            let pairs: Vec<_> = minimal_env()
                .into_iter()
                .filter(|(k, _)| *k != missing)
                .collect();
            let err = DeployerConfig::from_sources(ConfigFile::default(), env_of(&pairs))
                .unwrap_err();
            assert!(err.to_string().contains(missing), "{err}");
        }
    }

    #[test]
    fn blank_token_list_fails() {
        let mut pairs = minimal_env();
        pairs.retain(|(k, _)| *k != env::WEBHOOK_TOKENS);
        pairs.push((env::WEBHOOK_TOKENS, " , ,"));
        assert!(DeployerConfig::from_sources(ConfigFile::default(), env_of(&pairs)).is_err());
    }

    #[test]
    fn unknown_template_placeholder_fails_at_load() {
        let mut pairs = minimal_env();
        pairs.retain(|(k, _)| *k != env::TARGET_DIR);
        pairs.push((env::TARGET_DIR, "/srv/{project.owner}"));

        let err = DeployerConfig::from_sources(ConfigFile::default(), env_of(&pairs)).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("Invalid target_dir template"), "{chain}");
        assert!(chain.contains("project.owner"), "{chain}");
    }

    #[test]
    fn relative_staging_dir_fails() {
        let mut pairs = minimal_env();
        pairs.push((env::STAGING_DIR, "relative/staging"));
        assert!(DeployerConfig::from_sources(ConfigFile::default(), env_of(&pairs)).is_err());
    }

    #[test]
    fn invalid_bool_fails() {
        let mut pairs = minimal_env();
        pairs.push((env::DEBUG, "perhaps"));
        let err = DeployerConfig::from_sources(ConfigFile::default(), env_of(&pairs)).unwrap_err();
        assert!(err.to_string().contains("DEBUG"));
    }

    #[test]
    fn non_http_server_fails() {
        let mut pairs = minimal_env();
        pairs.push((env::GITLAB_SERVER, "ftp://gitlab.example.com"));
        assert!(DeployerConfig::from_sources(ConfigFile::default(), env_of(&pairs)).is_err());
    }

    #[test]
    fn discover_explicit_missing_file_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        assert!(discover_config_file(Some(&missing)).is_err());
    }

    #[test]
    fn load_records_source_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("deployer.toml");
        std::fs::write(
            &path,
            r#"
webhook_tokens = ["t"]
target_dir = "/srv/{build.id}"

[gitlab]
api_token = "glpat-file"
"#,
        )
        .unwrap();

        let config = DeployerConfig::load_with(Some(&path), |_| None).unwrap();
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn discover_explicit_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(discover_config_file(Some(&path)).unwrap(), Some(path));
    }
}
