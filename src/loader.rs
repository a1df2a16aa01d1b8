// Settings Loader (§4.1).
//
// Clones the settings repository into a workspace subdirectory via the `GitClient`
// collaborator, reads the YAML file at the derived relative path, and parses it into
// a `PipelineSettings` tree. Matches the donor's `AzureParser::parse_file` shape
// (`parser/azure.rs`): a thin read-then-parse wrapper, with every failure mode folded
// into one error type rather than panicking.

use std::path::{Path, PathBuf};

use crate::collaborators::GitClient;
use crate::error::{ServiceError, ServiceResult};
use crate::model::PipelineSettings;
use crate::reporter::{Reporter, Severity};

pub struct SettingsLoader<'a> {
    git: &'a dyn GitClient,
    workspace_dir: PathBuf,
}

impl<'a> SettingsLoader<'a> {
    pub fn new(git: &'a dyn GitClient, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            git,
            workspace_dir: workspace_dir.into(),
        }
    }

    /// `load(url, branch, relative_path, verbose?) -> PipelineSettings` (§4.1).
    pub async fn load(
        &self,
        url: &str,
        branch: &str,
        relative_path: &str,
        verbose: bool,
        reporter: &Reporter,
    ) -> ServiceResult<PipelineSettings> {
        self.git
            .clone_repo(url, branch, &self.workspace_dir, None)
            .await
            .map_err(|e| ServiceError::loader(format!("failed to clone {url}@{branch}: {e}")))?;

        let file_path = self.workspace_dir.join(relative_path);
        let raw = self.read_file(&file_path).await?;

        if verbose {
            reporter.log(Severity::Debug, format!("settings file {relative_path}:\n{raw}"));
        }

        serde_yaml::from_str(&raw)
            .map_err(|e| ServiceError::loader(format!("failed to parse {relative_path} as YAML: {e}")))
    }

    async fn read_file(&self, path: &Path) -> ServiceResult<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::loader(format!("failed to read {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullCollaborators;
    use crate::reporter::report_channel;
    use std::fs;

    #[tokio::test]
    async fn loads_and_parses_a_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pipelines")).unwrap();
        fs::write(
            dir.path().join("pipelines/service-a.yaml"),
            "stages:\n  - name: build\n    actions: []\n",
        )
        .unwrap();

        let collaborators = NullCollaborators::new();
        let loader = SettingsLoader::new(&collaborators, dir.path());
        let (tx, _rx) = report_channel();
        let reporter = Reporter::new(tx, false);

        let settings = loader
            .load("https://example/repo", "main", "pipelines/service-a.yaml", false, &reporter)
            .await
            .unwrap();
        assert_eq!(settings.stages.len(), 1);
    }

    #[tokio::test]
    async fn fails_with_loader_error_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let collaborators = NullCollaborators::new();
        let loader = SettingsLoader::new(&collaborators, dir.path());
        let (tx, _rx) = report_channel();
        let reporter = Reporter::new(tx, false);

        let result = loader
            .load("https://example/repo", "main", "pipelines/missing.yaml", false, &reporter)
            .await;
        assert!(matches!(result, Err(ServiceError::Loader(_))));
    }

    #[tokio::test]
    async fn fails_with_loader_error_on_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yaml"), "stages: [this is: not, valid").unwrap();

        let collaborators = NullCollaborators::new();
        let loader = SettingsLoader::new(&collaborators, dir.path());
        let (tx, _rx) = report_channel();
        let reporter = Reporter::new(tx, false);

        let result = loader.load("https://example/repo", "main", "bad.yaml", false, &reporter).await;
        assert!(result.is_err());
    }
}
