// Copyright 2024 Algorealm Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::TriggrConfig;
use anyhow::Context;
use directories_next::ProjectDirs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use triggr_store::SledStore;

/// Package identifier, where the default configuration & database are defined.
/// If the user does not start the node with the `--config-dir`
/// it will default to read from the default location depending on the OS.
pub const PACKAGE_ID: [&str; 3] = ["cloud", "algorealm", "triggr"];

/// The Triggr Node Command-line tool
///
/// Start the node from a config directory:
///
/// $ triggr -vvv -c <CONFIG_DIR_PATH>
#[derive(StructOpt)]
#[structopt(name = "Triggr")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory that contains configration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Create the Database Store in a temporary directory.
    /// and will be deleted when the process exits.
    #[structopt(long)]
    pub tmp: bool,
}

/// Loads the configuration from the given directory.
///
/// Returns `Ok(TriggrConfig)` on success, or `Err(anyhow::Error)` on failure.
///
/// # Arguments
///
/// * `config_dir` - An optional `PathBuf` representing the directory that contains the configuration.
pub fn load_config<P>(config_dir: Option<P>) -> anyhow::Result<TriggrConfig>
where
    P: AsRef<Path>,
{
    tracing::debug!("Getting default dirs for the triggr node");
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")?;
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => dirs.config_dir().to_path_buf(),
    };
    // return an error if the path is not a directory.
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading Config from {} ..", path.display());
    let config = crate::utils::load(path)?;
    tracing::trace!("Config loaded..");
    Ok(config)
}

/// Sets up the logger for the node, based on the verbosity level passed in.
///
/// Returns `Ok(())` on success, or `Err(anyhow::Error)` on failure.
///
/// # Arguments
///
/// * `verbosity` - An i32 value representing the verbosity level.
/// * `filter` - An &str representing the log target to filter on.
pub fn setup_logger(verbosity: i32, filter: &str) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("{filter}={log_level}").parse()?)
        .add_directive(format!("triggr_probe={log_level}").parse()?);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    logger.init();
    Ok(())
}

/// Creates the persistent store for the node.
///
/// With `--tmp`, the store lives in a temporary directory that is removed
/// when the process exits.
pub async fn create_store(opts: &Opts) -> anyhow::Result<SledStore> {
    let db_path = match (opts.tmp, opts.config_dir.as_ref()) {
        (true, _) => {
            tracing::debug!("Using temp dir for store");
            return SledStore::temporary().map_err(Into::into);
        }
        (false, Some(p)) => p.join("store"),
        (false, None) => {
            let dirs =
                ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
                    .context("failed to get database path")?;
            dirs.data_local_dir().join("store")
        }
    };
    SledStore::open(db_path).map_err(Into::into)
}
