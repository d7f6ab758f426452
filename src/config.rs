use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub seqr_migrate: String,
    pub dependencies: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const SEQR_MIGRATE_LEVEL: &str = "info";
    const DEPENDENCIES_LEVEL: &str = "warn";

    /// flexi_logger spec: our own crate at its level, everything else at the other.
    pub fn level_spec(&self) -> String {
        format!("{}, seqr_migrate={}", self.dependencies, self.seqr_migrate)
    }

    fn normalize(value: &mut String, name: &str, default: &str) {
        let original = value.clone();
        *value = value.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&value.as_str()) {
            eprintln!(
                "Config error: {} log level of '{}' is invalid - using default of '{}'",
                name, original, default
            );
            *value = default.to_owned();
        }
    }

    fn ensure_valid(&mut self) {
        Self::normalize(&mut self.seqr_migrate, "seqr_migrate", Self::SEQR_MIGRATE_LEVEL);
        Self::normalize(&mut self.dependencies, "dependencies", Self::DEPENDENCIES_LEVEL);
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            seqr_migrate: Self::SEQR_MIGRATE_LEVEL.to_string(),
            dependencies: Self::DEPENDENCIES_LEVEL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the SQLite database. Defaults to `seqr.db` in the data directory.
    pub path: Option<String>,
}

impl DatabaseConfig {
    const DB_FILENAME: &str = "seqr.db";

    pub fn resolve_path(&self, project_dirs: &ProjectDirs) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None => project_dirs.data_local_dir().join(Self::DB_FILENAME),
        }
    }
}

/// Names of the grouping records that replace the legacy staff flags.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessConfig {
    pub analyst_project_category: String,
    pub analyst_user_group: String,
    pub pm_user_group: String,
    /// Write `disable_staff_access` back to non-analyst projects when rolling
    /// back. Off by default, which keeps the historical rollback behaviour.
    pub persist_staff_access_restore: bool,
}

impl AccessConfig {
    const ANALYST_PROJECT_CATEGORY: &str = "analyst-projects";
    const ANALYST_USER_GROUP: &str = "analysts";
    const PM_USER_GROUP: &str = "project-managers";

    fn ensure_valid(&mut self) {
        let fields = [
            (
                &mut self.analyst_project_category,
                "analyst_project_category",
                Self::ANALYST_PROJECT_CATEGORY,
            ),
            (
                &mut self.analyst_user_group,
                "analyst_user_group",
                Self::ANALYST_USER_GROUP,
            ),
            (&mut self.pm_user_group, "pm_user_group", Self::PM_USER_GROUP),
        ];
        for (value, name, default) in fields {
            *value = value.trim().to_owned();
            if value.is_empty() {
                eprintln!(
                    "Config error: {} must not be empty - using default of '{}'",
                    name, default
                );
                *value = default.to_owned();
            }
        }

        if self.analyst_user_group == self.pm_user_group {
            eprintln!(
                "Config error: analyst and project manager groups share the name '{}' - using defaults",
                self.pm_user_group
            );
            self.analyst_user_group = Self::ANALYST_USER_GROUP.to_owned();
            self.pm_user_group = Self::PM_USER_GROUP.to_owned();
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        AccessConfig {
            analyst_project_category: Self::ANALYST_PROJECT_CATEGORY.to_owned(),
            analyst_user_group: Self::ANALYST_USER_GROUP.to_owned(),
            pm_user_group: Self::PM_USER_GROUP.to_owned(),
            persist_staff_access_restore: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub access: AccessConfig,
}

impl Config {
    const ENV_PREFIX: &str = "SEQR_";

    /// Loads the configuration from a TOML file located in the app's data directory,
    /// writing the defaults there first if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");

        if !config_path.exists() {
            Self::write_default(&config_path);
        }

        Self::load_from(&config_path)
    }

    fn write_default(config_path: &Path) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(e) => eprintln!("Failed to serialize default config: {}", e),
        }
    }

    /// Defaults, then the TOML file (if it exists), then `SEQR_` environment
    /// variables. `__` separates nested keys, e.g. `SEQR_ACCESS__PM_USER_GROUP`.
    pub fn load_from(config_path: &Path) -> Self {
        let default_config = Config::default();
        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();
        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.access.ensure_valid();
    }

    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::default)
    }
}
