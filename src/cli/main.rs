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


use std::io;
use std::path::{Path, PathBuf};

use log::error;
use structopt::StructOpt;

use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Replay a scripted series of mailbox changes.
    ///
    /// The script is a TOML file listing the initial UIDs of a mailbox, the
    /// sessions which have it selected, and a sequence of steps (appends,
    /// flag changes, expunges, polls, lookups). The untagged responses each
    /// session would send to its client are written to standard output.
    Replay(ReplaySubcommand),
}

#[derive(StructOpt)]
struct ReplaySubcommand {
    /// Configuration file (see `SystemConfig`); defaults are used if not
    /// given.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// The script to replay.
    #[structopt(parse(from_os_str))]
    script: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Replay(cmd) => replay(cmd),
    }
}

fn replay(cmd: ReplaySubcommand) {
    let config = match cmd.config {
        None => SystemConfig::default(),
        Some(ref path) => match SystemConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error in config file at '{}': {}", path.display(), e);
                EX_CONFIG.exit()
            }
        },
    };

    init_log(&config);

    let script = match super::replay::Script::load(&cmd.script) {
        Ok(script) => script,
        Err(e @ Error::Io(..)) => {
            error!("Error reading '{}': {}", cmd.script.display(), e);
            EX_NOINPUT.exit()
        }
        Err(e) => {
            error!("Error in script '{}': {}", cmd.script.display(), e);
            EX_DATAERR.exit()
        }
    };

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    if let Err(e) = super::replay::run(&script, &config, &mut stdout) {
        error!("Replay of '{}' failed: {}", cmd.script.display(), e);
        Sysexit::for_error(&e).exit();
    }
}

fn init_log(config: &SystemConfig) {
    if let Some(ref log_config_file) = config.logging.config_file {
        if let Err(e) = init_file_log(log_config_file) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
    } else {
        let level = match config.logging.level_filter() {
            Some(level) => level,
            None => {
                eprintln!("Unknown log level '{}'", config.logging.level);
                EX_CONFIG.exit()
            }
        };

        if let Err(e) = crate::init_simple_log(level) {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        }
    }
}

fn init_file_log(path: &Path) -> Result<(), String> {
    log4rs::init_file(path, log4rs::file::Deserializers::new())
        .map_err(|e| e.to_string())
}
