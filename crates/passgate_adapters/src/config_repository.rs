use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use passgate_core::config::Settings;
use passgate_core::ports::ConfigRepository;
use passgate_core::Error;
use tokio::fs;
use tracing::{debug, instrument};

const CONFIG_FILE: &str = "config.toml";

/// Settings kept as a TOML file; a missing file reads as the defaults.
pub struct FileConfigRepository {
    config_path: PathBuf,
}

impl FileConfigRepository {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_path: config_dir.join(CONFIG_FILE),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

fn parse_settings(content: &str) -> Result<Settings, Error> {
    let settings: Settings = toml::from_str(content)
        .map_err(|e| Error::Config(format!("cannot parse {}: {}", CONFIG_FILE, e)))?;
    settings.validate()?;
    Ok(settings)
}

#[async_trait]
impl ConfigRepository for FileConfigRepository {
    #[instrument(skip(self), fields(path = %self.config_path.display()))]
    async fn load_settings(&self) -> Result<Settings, Error> {
        match fs::read_to_string(&self.config_path).await {
            Ok(content) => parse_settings(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no settings file, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validates first; an invalid `settings` never reaches the disk.
    #[instrument(skip_all, fields(path = %self.config_path.display()))]
    async fn save_settings(&self, settings: &Settings) -> Result<(), Error> {
        settings.validate()?;
        let content = toml::to_string_pretty(settings)
            .map_err(|e| Error::Config(format!("cannot serialize settings: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staged = self.config_path.with_extension("toml.tmp");
        fs::write(&staged, content).await?;
        fs::rename(&staged, &self.config_path).await?;
        debug!("settings saved");
        Ok(())
    }

    async fn exists(&self) -> bool {
        fs::metadata(&self.config_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passgate_core::config::BrowserKind;
    use passgate_core::entities::GoogleLoginMethod;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_defaults_when_no_file() {
        let dir = tempdir().unwrap();
        let repo = FileConfigRepository::new(dir.path().to_path_buf());

        let settings = repo.load_settings().await.unwrap();

        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = FileConfigRepository::new(dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.browser.engine = BrowserKind::Webkit;
        settings.browser.headless = true;
        settings.storage.data_dir = Some(PathBuf::from("/srv/passgate"));
        settings.login.google_login_method = GoogleLoginMethod::Automation;
        settings.log_level = "debug".to_string();

        repo.save_settings(&settings).await.unwrap();
        let loaded = repo.load_settings().await.unwrap();

        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = tempdir().unwrap();
        let repo = FileConfigRepository::new(dir.path().to_path_buf());

        assert!(!repo.exists().await);
        repo.save_settings(&Settings::default()).await.unwrap();
        assert!(repo.exists().await);
    }

    #[tokio::test]
    async fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let partial_config = r#"
[login]
google_login_method = "playwright"
"#;
        tokio::fs::write(dir.path().join("config.toml"), partial_config)
            .await
            .unwrap();

        let repo = FileConfigRepository::new(dir.path().to_path_buf());
        let settings = repo.load_settings().await.unwrap();

        assert_eq!(settings.login.google_login_method, GoogleLoginMethod::Automation);
        assert!(settings.login.precheck_google_oauth);
        assert_eq!(settings.browser.element_timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let dir = tempdir().unwrap();
        let repo = FileConfigRepository::new(dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.storage.kdf_iterations = 0;
        assert!(matches!(
            repo.save_settings(&settings).await,
            Err(Error::Config(_))
        ));
        assert!(!repo.exists().await);

        tokio::fs::write(repo.config_path(), "log_level = \"loud\"\n")
            .await
            .unwrap();
        assert!(matches!(repo.load_settings().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let nested_dir = dir.path().join("nested").join("config");
        let repo = FileConfigRepository::new(nested_dir.clone());

        assert!(!nested_dir.exists());
        repo.save_settings(&Settings::default()).await.unwrap();

        assert!(nested_dir.exists());
        assert!(repo.exists().await);
    }
}
