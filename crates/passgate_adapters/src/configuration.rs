use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use passgate_core::config::Settings;
use passgate_core::crypto::DEFAULT_KDF_ITERATIONS;

/// Layered settings: defaults, then the system `config.toml`, then `./config/config.toml`,
/// then `PASSGATE__SECTION__KEY` environment variables.
pub fn get_configuration_with_paths(
    current_dir_path: Option<PathBuf>,
    system_config_dir_path: Option<PathBuf>,
) -> Result<Settings, config::ConfigError> {
    let config_directory = current_dir_path.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.join("config"))
            .unwrap_or_else(|_| PathBuf::from("config"))
    });

    let system_config_dir = match system_config_dir_path {
        Some(path) => path,
        None => system_config_dir(),
    };

    let settings = Config::builder()
        // Browser (enums serialize to lowercase strings)
        .set_default("browser.engine", "chromium")?
        .set_default("browser.headless", false)?
        .set_default("browser.element_timeout_secs", 30)?
        // Storage
        .set_default("storage.kdf_iterations", i64::from(DEFAULT_KDF_ITERATIONS))?
        // Login flow
        .set_default("login.google_login_method", "system_browser")?
        .set_default("login.precheck_google_oauth", true)?
        .set_default("login.post_login_delay_secs", 5)?
        .set_default("login.user_action_timeout_secs", 300)?
        .set_default("log_level", "info")?
        .add_source(File::from(system_config_dir.join("config.toml")).required(false))
        .add_source(File::from(config_directory.join("config.toml")).required(false))
        .add_source(Environment::with_prefix("PASSGATE").separator("__"))
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    get_configuration_with_paths(None, None)
}

/// Per-user config directory, `./config` when the platform has none.
pub fn system_config_dir() -> PathBuf {
    ProjectDirs::from("com", "passgate", "passgate")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// Where the encrypted store lives unless `storage.data_dir` says otherwise.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "passgate", "passgate")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use passgate_core::config::BrowserKind;
    use passgate_core::entities::GoogleLoginMethod;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::tempdir;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("PASSGATE__") {
                std::env::remove_var(&key);
            }
        }
    }

    fn nowhere() -> Option<PathBuf> {
        Some(PathBuf::from("/nonexistent"))
    }

    fn write_config(dir: &std::path::Path, content: &str) {
        let mut file = std::fs::File::create(dir.join("config.toml")).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[serial]
    #[test]
    fn test_get_configuration_defaults() {
        clear_env();

        let settings = get_configuration_with_paths(nowhere(), nowhere()).unwrap();

        assert_eq!(settings, Settings::default());
    }

    #[serial]
    #[test]
    fn test_get_configuration_file_override() {
        clear_env();
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            browser.engine = "firefox"
            browser.headless = true
            login.google_login_method = "automation"
            log_level = "debug"
            "#,
        );

        let settings = get_configuration_with_paths(Some(dir.path().to_path_buf()), nowhere()).unwrap();

        assert_eq!(settings.browser.engine, BrowserKind::Firefox);
        assert!(settings.browser.headless);
        assert_eq!(settings.login.google_login_method, GoogleLoginMethod::Automation);
        assert_eq!(settings.log_level, "debug");
        // Untouched keys keep their defaults.
        assert_eq!(settings.login.user_action_timeout_secs, 300);
    }

    #[serial]
    #[test]
    fn test_get_configuration_env_override() {
        clear_env();
        std::env::set_var("PASSGATE__BROWSER__HEADLESS", "true");
        std::env::set_var("PASSGATE__LOGIN__POST_LOGIN_DELAY_SECS", "0");
        std::env::set_var("PASSGATE__LOG_LEVEL", "trace");

        let settings = get_configuration_with_paths(nowhere(), nowhere()).unwrap();

        assert!(settings.browser.headless);
        assert_eq!(settings.login.post_login_delay_secs, 0);
        assert_eq!(settings.log_level, "trace");

        clear_env();
    }

    #[serial]
    #[test]
    fn test_get_configuration_precedence_env_over_file() {
        clear_env();
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            login.google_login_method = "automation"
            log_level = "debug"
            "#,
        );
        std::env::set_var("PASSGATE__LOGIN__GOOGLE_LOGIN_METHOD", "system_browser");
        std::env::set_var("PASSGATE__LOG_LEVEL", "warn");

        let settings = get_configuration_with_paths(Some(dir.path().to_path_buf()), nowhere()).unwrap();

        assert_eq!(settings.login.google_login_method, GoogleLoginMethod::SystemBrowser);
        assert_eq!(settings.log_level, "warn");

        clear_env();
    }

    #[serial]
    #[test]
    fn test_local_file_overrides_system_file() {
        clear_env();
        let system = tempdir().unwrap();
        let local = tempdir().unwrap();
        write_config(system.path(), "browser.element_timeout_secs = 10\nlog_level = \"error\"\n");
        write_config(local.path(), "log_level = \"debug\"\n");

        let settings = get_configuration_with_paths(
            Some(local.path().to_path_buf()),
            Some(system.path().to_path_buf()),
        )
        .unwrap();

        assert_eq!(settings.browser.element_timeout_secs, 10);
        assert_eq!(settings.log_level, "debug");
    }

    #[serial]
    #[test]
    fn test_every_layer_contributes_to_loaded_settings() {
        clear_env();
        let system = tempdir().unwrap();
        let local = tempdir().unwrap();
        write_config(
            system.path(),
            "storage.kdf_iterations = 200000\nstorage.data_dir = \"/var/lib/passgate\"\n",
        );
        write_config(local.path(), "browser.engine = \"webkit\"\nlogin.precheck_google_oauth = false\n");
        std::env::set_var("PASSGATE__LOGIN__USER_ACTION_TIMEOUT_SECS", "120");

        let settings = get_configuration_with_paths(
            Some(local.path().to_path_buf()),
            Some(system.path().to_path_buf()),
        )
        .unwrap();
        clear_env();

        insta::assert_json_snapshot!(settings, @r###"
        {
          "browser": {
            "engine": "webkit",
            "headless": false,
            "element_timeout_secs": 30
          },
          "storage": {
            "data_dir": "/var/lib/passgate",
            "kdf_iterations": 200000
          },
          "login": {
            "google_login_method": "system_browser",
            "precheck_google_oauth": false,
            "post_login_delay_secs": 5,
            "user_action_timeout_secs": 120
          },
          "log_level": "info"
        }
        "###);
    }
}
