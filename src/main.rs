mod analysis_status;
mod cli;
mod config;
mod db;
mod error;

use clap::Parser;
use cli::Cli;
use config::{Config, CONFIG};
use directories::ProjectDirs;
use flexi_logger::{detailed_format, Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

fn main() {
    // clap exits here for --help, --version and usage errors, before anything touches disk
    let args = Cli::parse();

    let Some(project_dirs) = ProjectDirs::from("org", "broadinstitute", "seqr-migrate") else {
        eprintln!("Could not determine project directory");
        std::process::exit(1);
    };

    let _logger = if args.command.uses_config() {
        let config = Config::load_config(&project_dirs);
        let level_spec = config.logging.level_spec();
        CONFIG.get_or_init(|| config);
        start_logger(&project_dirs, &level_spec)
    } else {
        None
    };

    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line(args, &project_dirs) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

// Logging is best effort: the migration still runs without a log file
fn start_logger(project_dirs: &ProjectDirs, level_spec: &str) -> Option<LoggerHandle> {
    let started = Logger::try_with_str(level_spec).and_then(|logger| {
        logger
            .log_to_file(
                FileSpec::default()
                    .directory(project_dirs.data_local_dir().join("logs"))
                    .basename("seqr-migrate"),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .format_for_files(detailed_format)
            .start()
    });
    match started {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to start logger: {}", e);
            None
        }
    }
}
