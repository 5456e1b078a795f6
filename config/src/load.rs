use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use rust_cli_config::{Environment as EnvironmentSource, File};
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::{IndexerConfig, JobScheduleConfig, ValidationError};

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Subdirectory holding one trigger file per scheduled job.
const JOBS_DIR: &str = "jobs";

/// Stem of the configuration file shared by every environment.
const BASE_STEM: &str = "base";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variable overrides (`APP_SOURCE__HOST`).
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

const ENV_SEPARATOR: &str = "__";

/// Key of a trigger file defaulting to the file stem.
const JOB_NAME_KEY: &str = "name";

/// Errors raised while loading the indexer configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("no `{BASE_STEM}` configuration file in `{0}`")]
    MissingBaseFile(PathBuf),

    #[error("failed to load `{path}`: {source}")]
    File {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to read job triggers from `{path}`: {source}")]
    JobsDirectory { path: PathBuf, source: io::Error },

    #[error("failed to deserialize indexer configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),

    #[error("invalid indexer configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads and validates the indexer configuration from `./configuration`.
///
/// The environment comes from `APP_ENVIRONMENT`. See [`load_indexer_config_from`] for the
/// layering.
pub fn load_indexer_config() -> Result<IndexerConfig, LoadConfigError> {
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_indexer_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads and validates the indexer configuration from `directory`.
///
/// Layers, each overriding the previous one:
/// 1. `base.(yaml|yml|json)`, which is required.
/// 2. `{environment}.(yaml|yml|json)`, when present.
/// 3. `APP_` prefixed environment variables, with `__` between nested keys.
///
/// Every file of `jobs/` then adds one trigger to [`IndexerConfig::jobs`], named after the file
/// unless it sets `name`. The result is validated as a whole, so a broken section or a job
/// scheduled twice fails here rather than when the scheduler starts.
pub fn load_indexer_config_from(
    directory: &Path,
    environment: Environment,
) -> Result<IndexerConfig, LoadConfigError> {
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = find_file(directory, BASE_STEM)
        .ok_or_else(|| LoadConfigError::MissingBaseFile(directory.to_path_buf()))?;

    let mut builder = add_file(rust_cli_config::Config::builder(), &base_file)?;
    if let Some(environment_file) = find_file(directory, environment.as_str()) {
        builder = add_file(builder, &environment_file)?;
    }

    let mut config = builder
        .add_source(
            EnvironmentSource::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_PREFIX_SEPARATOR)
                .separator(ENV_SEPARATOR),
        )
        .build()
        .and_then(|settings| settings.try_deserialize::<IndexerConfig>())
        .map_err(LoadConfigError::Deserialization)?;

    config.jobs.extend(load_job_files(&directory.join(JOBS_DIR))?);
    config.validate()?;

    Ok(config)
}

/// Reads every trigger file of `directory`, in file name order.
fn load_job_files(directory: &Path) -> Result<Vec<JobScheduleConfig>, LoadConfigError> {
    if !directory.is_dir() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(directory).map_err(|source| LoadConfigError::JobsDirectory {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| LoadConfigError::JobsDirectory {
                path: directory.to_path_buf(),
                source,
            })?
            .path();

        let supported = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| CONFIG_FILE_EXTENSIONS.contains(&extension));
        if path.is_file() && supported {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(|path| load_job_file(path)).collect()
}

fn load_job_file(path: &Path) -> Result<JobScheduleConfig, LoadConfigError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();

    rust_cli_config::Config::builder()
        .set_default(JOB_NAME_KEY, stem)
        .and_then(|builder| builder.add_source(File::from(path)).build())
        .and_then(|settings| settings.try_deserialize::<JobScheduleConfig>())
        .map_err(|source| LoadConfigError::File {
            path: path.to_path_buf(),
            source,
        })
}

fn find_file(directory: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
}

/// Adds `path` to the builder, building once so a malformed file is reported by name.
fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, LoadConfigError> {
    let builder = builder.add_source(File::from(path));
    builder
        .build_cloned()
        .map_err(|source| LoadConfigError::File {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(builder)
}
