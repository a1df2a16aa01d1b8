// Ambient configuration loading (§6, §10.3).
//
// Three loader tunables plus the job-name-stripping regex list, each overridable by a
// `JUWP_`-prefixed environment variable. Loading only fails when an overridden regex
// list fails to compile; a missing environment variable simply falls back to the
// built-in default, the same relationship the donor's `TaskCacheConfig::default()`
// had with `dirs::home_dir()`.

use regex::Regex;

use crate::error::{ServiceError, ServiceResult};

const ENV_SETTINGS_GIT_URL: &str = "JUWP_SETTINGS_GIT_URL";
const ENV_SETTINGS_DEFAULT_BRANCH: &str = "JUWP_SETTINGS_DEFAULT_BRANCH";
const ENV_SETTINGS_RELATIVE_PATH_PREFIX: &str = "JUWP_SETTINGS_RELATIVE_PATH_PREFIX";
const ENV_PIPELINE_NAME_REGEX_REPLACE: &str = "JUWP_PIPELINE_NAME_REGEX_REPLACE";

const DEFAULT_SETTINGS_GIT_URL: &str = "";
const DEFAULT_SETTINGS_DEFAULT_BRANCH: &str = "main";
const DEFAULT_SETTINGS_RELATIVE_PATH_PREFIX: &str = "pipelines";

#[derive(Debug, Clone)]
pub struct Config {
    pub settings_repo_url: String,
    pub settings_default_branch: String,
    pub settings_relative_path_prefix: String,
    /// Ordered regex patterns stripped from the job name to derive the YAML filename.
    pub pipeline_name_regex_replace: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_repo_url: DEFAULT_SETTINGS_GIT_URL.to_string(),
            settings_default_branch: DEFAULT_SETTINGS_DEFAULT_BRANCH.to_string(),
            settings_relative_path_prefix: DEFAULT_SETTINGS_RELATIVE_PATH_PREFIX.to_string(),
            pipeline_name_regex_replace: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration, applying any `JUWP_*` environment overrides on top of the
    /// defaults.
    pub fn from_env() -> ServiceResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(ENV_SETTINGS_GIT_URL) {
            config.settings_repo_url = url;
        }
        if let Ok(branch) = std::env::var(ENV_SETTINGS_DEFAULT_BRANCH) {
            config.settings_default_branch = branch;
        }
        if let Ok(prefix) = std::env::var(ENV_SETTINGS_RELATIVE_PATH_PREFIX) {
            config.settings_relative_path_prefix = prefix;
        }
        if let Ok(list) = std::env::var(ENV_PIPELINE_NAME_REGEX_REPLACE) {
            let patterns: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            for pattern in &patterns {
                Regex::new(pattern)
                    .map_err(|e| ServiceError::Config(format!("invalid regex '{pattern}': {e}")))?;
            }
            config.pipeline_name_regex_replace = patterns;
        }

        Ok(config)
    }

    /// Derive the YAML relative path for a job name, stripping each configured
    /// prefix/suffix regex in order (§4.1, §6).
    pub fn relative_path_for_job(&self, job_name: &str) -> ServiceResult<String> {
        let mut stripped = job_name.to_string();
        for pattern in &self.pipeline_name_regex_replace {
            let re = Regex::new(pattern)
                .map_err(|e| ServiceError::Config(format!("invalid regex '{pattern}': {e}")))?;
            stripped = re.replace_all(&stripped, "").to_string();
        }
        Ok(format!("{}/{}.yaml", self.settings_relative_path_prefix, stripped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible_without_environment() {
        let config = Config::default();
        assert_eq!(config.settings_default_branch, "main");
        assert_eq!(config.settings_relative_path_prefix, "pipelines");
    }

    #[test]
    fn derives_relative_path_after_stripping_patterns() {
        let mut config = Config::default();
        config.pipeline_name_regex_replace = vec!["^ci-".to_string(), "-build$".to_string()];
        let path = config.relative_path_for_job("ci-service-a-build").unwrap();
        assert_eq!(path, "pipelines/service-a.yaml");
    }

    #[test]
    fn rejects_invalid_regex_override() {
        std::env::set_var(ENV_PIPELINE_NAME_REGEX_REPLACE, "[unterminated");
        let result = Config::from_env();
        std::env::remove_var(ENV_PIPELINE_NAME_REGEX_REPLACE);
        assert!(result.is_err());
    }
}
