// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use crate::TransferConfig;

/// Serialize a config so it can be loaded with [load_config].
pub fn save_config(config: &TransferConfig) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(config)
}

/// Load a config written by [save_config].
pub fn load_config(bytes: &[u8]) -> Result<TransferConfig, bincode::Error> {
    bincode::deserialize(bytes)
}
