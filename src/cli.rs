use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;
use strum::IntoEnumIterator;

use crate::analysis_status::AnalysisStatus;
use crate::config::Config;
use crate::db::migration::{MigrationExecutor, MigrationStatus, Target};
use crate::db::schema::all_migrations;
use crate::db::Database;
use crate::error::SeqrError;

#[derive(Parser)]
#[command(
    name = "seqr-migrate",
    version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIMESTAMP"), ")"),
    about = "Apply and roll back seqr database migrations"
)]
pub struct Cli {
    /// Database file (default: seqr.db in the data directory, or database.path from config)
    #[arg(long = "db", short = 'd', global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply migrations, or roll back to TARGET
    Migrate {
        /// Migration name or unique prefix, or "zero" to unapply everything (default: latest)
        target: Option<String>,

        /// Record the migrations as applied or unapplied without running them
        #[arg(long = "fake", default_value_t = false)]
        fake: bool,
    },

    /// List registered migrations and whether each is applied
    Show {
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },

    /// Print the family analysis status codes
    Statuses,
}

impl Command {
    /// Whether the command reads config.toml. Listing status codes must not
    /// create the data directory.
    pub fn uses_config(&self) -> bool {
        !matches!(self, Command::Statuses)
    }
}

impl Cli {
    pub fn handle_command_line(args: Cli, project_dirs: &ProjectDirs) -> Result<(), SeqrError> {
        let config = Config::get();
        let default_db = config.database.resolve_path(project_dirs);
        print!("{}", args.run(config, &default_db)?);
        Ok(())
    }

    /// Run the parsed command and return what it prints.
    pub fn run(&self, config: &Config, default_db: &Path) -> Result<String, SeqrError> {
        match &self.command {
            Command::Statuses => Ok(Self::format_statuses()),
            Command::Migrate { target, fake } => {
                let db = self.open_database(default_db)?;
                let executor = MigrationExecutor::new(&db, all_migrations(&config.access))?;

                let report = executor.migrate(&Target::parse(target.as_deref()), *fake)?;
                let suffix = if *fake { " (fake)" } else { "" };
                let mut out = String::new();
                for name in &report.applied {
                    out.push_str(&format!("  Applied {}{}\n", name, suffix));
                }
                for name in &report.unapplied {
                    out.push_str(&format!("  Unapplied {}{}\n", name, suffix));
                }
                Ok(out)
            }
            Command::Show { json } => {
                let db = self.open_database(default_db)?;
                let executor = MigrationExecutor::new(&db, all_migrations(&config.access))?;
                let status = executor.status()?;

                if *json {
                    let out = serde_json::to_string_pretty(&status)
                        .map_err(|e| SeqrError::Error(format!("Failed to serialize status: {}", e)))?;
                    Ok(out + "\n")
                } else {
                    Ok(Self::format_status(&status))
                }
            }
        }
    }

    fn open_database(&self, default_db: &Path) -> Result<Database, SeqrError> {
        let db_path = self.db.as_deref().unwrap_or(default_db);
        info!("Opening database {}", db_path.display());
        Database::open(db_path)
    }

    fn format_status(status: &[MigrationStatus]) -> String {
        let mut out = String::new();
        let mut current_app = "";
        for entry in status {
            if entry.app != current_app {
                out.push_str(&entry.app);
                out.push('\n');
                current_app = entry.app.as_str();
            }
            let mark = if entry.applied { "X" } else { " " };
            out.push_str(&format!(" [{}] {}\n", mark, entry.name));
        }
        out
    }

    fn format_statuses() -> String {
        AnalysisStatus::iter()
            .map(|status| format!("{:<8} {}  {}\n", status.code(), status.category(), status.label()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn run(args: &[&str], default_db: &Path) -> Result<String, SeqrError> {
        let cli = Cli::try_parse_from(args).unwrap();
        cli.run(&Config::default(), default_db)
    }

    #[test]
    fn test_cli_requires_a_command() {
        assert!(Cli::try_parse_from(["seqr-migrate"]).is_err());
    }

    #[test]
    fn test_cli_parsing_migrate_defaults_to_latest() {
        let cli = Cli::try_parse_from(["seqr-migrate", "migrate"]).unwrap();
        assert!(cli.db.is_none());
        match cli.command {
            Command::Migrate { target, fake } => {
                assert_eq!(Target::parse(target.as_deref()), Target::Latest);
                assert!(!fake);
            }
            _ => panic!("expected migrate"),
        }
    }

    #[test]
    fn test_cli_parsing_migrate_target_and_fake() {
        let cli =
            Cli::try_parse_from(["seqr-migrate", "migrate", "0019", "--fake", "--db", "/tmp/s.db"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/s.db")));
        match cli.command {
            Command::Migrate { target, fake } => {
                assert_eq!(target.as_deref(), Some("0019"));
                assert!(fake);
            }
            _ => panic!("expected migrate"),
        }
    }

    #[test]
    fn test_cli_parsing_show_json() {
        let cli = Cli::try_parse_from(["seqr-migrate", "-d", "seqr.db", "show", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Show { json: true }));
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        assert!(Cli::try_parse_from(["seqr-migrate", "serve"]).is_err());
        assert!(Cli::try_parse_from(["seqr-migrate", "statuses", "--json"]).is_err());
    }

    #[test]
    fn test_format_status_groups_by_app() {
        let status = vec![
            MigrationStatus {
                app: "seqr".into(),
                name: "0019_auto_20201221_1718".into(),
                applied: true,
                applied_at: Some("2021-01-01T00:00:00+00:00".into()),
            },
            MigrationStatus {
                app: "seqr".into(),
                name: "0020_remove_project_disable_staff_access".into(),
                applied: false,
                applied_at: None,
            },
        ];
        assert_eq!(
            Cli::format_status(&status),
            "seqr\n [X] 0019_auto_20201221_1718\n [ ] 0020_remove_project_disable_staff_access\n"
        );
    }

    #[test]
    fn test_format_statuses_lists_every_code() {
        let table = Cli::format_statuses();
        assert_eq!(table.lines().count(), 13);
        assert!(table.contains("Rcpc     R  Reviewed, currently pursuing candidates"));
        assert!(table.starts_with("S        S  Solved\n"));
    }

    #[test]
    fn test_only_statuses_skips_config() {
        let statuses = Cli::try_parse_from(["seqr-migrate", "statuses"]).unwrap();
        assert!(!statuses.command.uses_config());
        let show = Cli::try_parse_from(["seqr-migrate", "show"]).unwrap();
        assert!(show.command.uses_config());
        let migrate = Cli::try_parse_from(["seqr-migrate", "migrate", "zero"]).unwrap();
        assert!(migrate.command.uses_config());
    }

    #[test]
    fn test_migrate_and_show_against_db_override() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("seqr.db");
        let db_arg = db_path.to_str().unwrap();
        let default_db = dir.path().join("missing").join("seqr.db");

        let out = run(&["seqr-migrate", "--db", db_arg, "migrate", "0020"], &default_db).unwrap();
        assert_eq!(
            out,
            "  Applied seqr.0019_auto_20201221_1718\n  Applied seqr.0020_remove_project_disable_staff_access\n"
        );
        assert!(db_path.exists());
        assert!(!default_db.exists());

        let text = run(&["seqr-migrate", "show", "--db", db_arg], &default_db).unwrap();
        assert!(text.starts_with("seqr\n"));
        assert!(text.contains(" [X] 0019_auto_20201221_1718\n"));
        assert!(text.contains(" [X] 0020_remove_project_disable_staff_access\n"));
        assert!(text.contains(" [ ] 0024_varianttag_metadata\n"));
        assert!(text.contains(" [ ] 0025_auto_20210428_1619\n"));

        let json = run(&["seqr-migrate", "-d", db_arg, "show", "--json"], &default_db).unwrap();
        let status: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entries = status.as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["name"], "0019_auto_20201221_1718");
        assert_eq!(entries[0]["applied"], true);
        assert!(entries[1]["applied_at"].is_string());
        assert_eq!(entries[3]["name"], "0025_auto_20210428_1619");
        assert_eq!(entries[3]["applied"], false);
        assert!(entries[3]["applied_at"].is_null());
    }

    #[test]
    fn test_fake_rollback_is_labelled() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("seqr.db");
        let db_arg = db_path.to_str().unwrap();

        run(&["seqr-migrate", "--db", db_arg, "migrate", "0019", "--fake"], &db_path).unwrap();
        let out = run(&["seqr-migrate", "migrate", "zero", "--fake"], &db_path).unwrap();
        assert_eq!(out, "  Unapplied seqr.0019_auto_20201221_1718 (fake)\n");
    }

    #[test]
    fn test_default_db_used_without_override() {
        let dir = TempDir::new().unwrap();
        let default_db = dir.path().join("missing").join("seqr.db");
        let result = run(&["seqr-migrate", "show"], &default_db);
        assert!(matches!(result, Err(SeqrError::IoError(_))));
    }
}
