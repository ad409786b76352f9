//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.


use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The configuration for sequence number bookkeeping and the tools around
/// it.
///
/// This is stored in a TOML file, conventionally named `seqmap.toml`. Every
/// section is optional.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Defaults applied to every newly selected session.
    #[serde(default)]
    pub session: SessionConfig,

    /// How to log.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// If true, sessions start out not being told about flag changes they
    /// made themselves.
    ///
    /// Sessions can still change this individually at any time. This only
    /// determines the initial value.
    pub silent_flag_changes: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The maximum level to log at when not using `config_file`.
    ///
    /// One of `off`, `error`, `warn`, `info`, `debug`, or `trace`.
    pub level: String,

    /// A log4rs configuration file to use instead of logging to standard
    /// error.
    ///
    /// Relative paths are relative to the directory containing the
    /// configuration file.
    pub config_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_owned(),
            config_file: None,
        }
    }
}

impl SystemConfig {
    /// Read the configuration from the given TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let mut config: SystemConfig = toml::from_str(&text)?;

        if let (Some(config_file), Some(parent)) =
            (config.logging.config_file.as_mut(), path.parent())
        {
            if config_file.is_relative() {
                *config_file = parent.join(&*config_file);
            }
        }

        Ok(config)
    }
}

impl LoggingConfig {
    /// Parse `level` into a filter, or `None` if it is not a known level.
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.level.parse().ok()
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert!(!config.session.silent_flag_changes);
        assert_eq!(Some(log::LevelFilter::Info), config.logging.level_filter());
        assert!(config.logging.config_file.is_none());
    }

    #[test]
    fn parse_full_config() {
        let config: SystemConfig = toml::from_str(
            r#"
[session]
silent_flag_changes = true

[logging]
level = "debug"
config_file = "/etc/log.toml"
"#,
        )
        .unwrap();
        assert!(config.session.silent_flag_changes);
        assert_eq!(
            Some(log::LevelFilter::Debug),
            config.logging.level_filter()
        );
        assert_eq!(
            Some(PathBuf::from("/etc/log.toml")),
            config.logging.config_file
        );
    }

    #[test]
    fn bad_level_detected() {
        let config: SystemConfig =
            toml::from_str("[logging]\nlevel = \"loud\"\n").unwrap();
        assert_eq!(None, config.logging.level_filter());
    }

    #[test]
    fn load_resolves_relative_log_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seqmap.toml");
        fs::File::create(&path)
            .unwrap()
            .write_all(b"[logging]\nconfig_file = \"logging.toml\"\n")
            .unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(
            Some(dir.path().join("logging.toml")),
            config.logging.config_file
        );
    }

    #[test]
    fn load_reports_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seqmap.toml");
        assert_matches!(Err(Error::Io(_)), SystemConfig::load(&path));

        fs::write(&path, "[session\n").unwrap();
        assert_matches!(Err(Error::Toml(_)), SystemConfig::load(&path));
    }
}
