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

use thiserror::Error;

use crate::account::model::Uid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("UID {0} is not in the mailbox")]
    NotTracked(Uid),
    #[error("UID {uid} does not follow UID {highest}")]
    OutOfOrderUid { uid: Uid, highest: Uid },
    #[error("Unknown system flag: {0}")]
    BadFlag(String),
    #[error("Invalid replay script: {0}")]
    BadScript(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
