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

use config::{Config, File};
use std::path::{Path, PathBuf};

use crate::TriggrConfig;

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> triggr_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(triggr_utils::Error::from))
        .collect()
}

/// Try to parse the [`TriggrConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> triggr_utils::Result<TriggrConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of TRIGGR).
    let builder = builder.add_source(
        config::Environment::with_prefix("TRIGGR").separator("_"),
    );
    let cfg = builder.build()?;
    // and finally deserialize the config and verify it
    let config: Result<
        TriggrConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => {
            c.verify()?;
            Ok(c)
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the configuration files and
/// then parse it into the [`TriggrConfig`].
pub fn load<P: AsRef<Path>>(path: P) -> triggr_utils::Result<TriggrConfig> {
    let files = search_config_files(path)?;
    parse_from_files(&files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_merges_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("base.toml")).unwrap();
        writeln!(base, "port = 6000").unwrap();
        let mut chains =
            std::fs::File::create(dir.path().join("chains.toml")).unwrap();
        writeln!(
            chains,
            "[chains.paseo]\nws-endpoint = \"wss://rpc.example.com\""
        )
        .unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(
            config.chains["paseo"].ws_endpoint,
            "wss://rpc.example.com"
        );
    }

    #[test]
    fn empty_dir_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.port, 5190);
        assert!(config.chains.is_empty());
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = std::fs::File::create(dir.path().join("bad.toml")).unwrap();
        writeln!(
            bad,
            "[chains.local]\nws-endpoint = \"tcp://not-a-ws-url\""
        )
        .unwrap();
        assert!(load(dir.path()).is_err());
    }
}
