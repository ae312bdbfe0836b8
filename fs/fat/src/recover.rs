// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fs, fs::File, io::Write, path::Path};

use log::warn;

use marten_ds::DataStorage;
use marten_fs::{Error, Result};

use crate::{table::Cluster, Volume};

impl<DS: DataStorage> Volume<DS> {
    /// Streams the cluster chain starting at `start_cluster` into
    /// `destination`, truncating the final cluster so exactly `size` bytes
    /// are written, never the cluster slack behind them.
    ///
    /// Missing parent directories are created. A chain that cannot deliver
    /// all `size` bytes (it ran into a free, bad or reserved entry, looped,
    /// or a cluster read failed mid-stream) fails with
    /// [`Error::PartialRecovery`] carrying the byte count that did reach the
    /// destination; the partial output file is left in place.
    pub fn recover_file(
        &self,
        start_cluster: Cluster,
        size: u32,
        destination: &Path,
    ) -> Result<u64> {
        let chain = self.fat.chain(start_cluster);
        if chain.is_empty() {
            return Err(Error::RecoverFailed("cluster chain is empty"));
        }
        if chain.end.is_suspicious() {
            warn!("{}: {}", destination.display(), chain.end.label());
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(destination)?;

        let expected = size as u64;
        let bytes_per_cluster = self.geometry().bytes_per_cluster() as u64;
        let mut written = 0u64;
        for &cluster in &chain.clusters {
            let lba = self.geometry().cluster_lba(cluster);
            let data = match self.read_sectors(lba, self.geometry().sectors_per_cluster) {
                Ok(data) => data,
                Err(error) if written == 0 => {
                    warn!("{}: first cluster unreadable: {error}", destination.display());
                    return Err(Error::RecoverFailed("first cluster is unreadable"));
                }
                Err(error) => {
                    return Err(Error::PartialRecovery {
                        written,
                        expected,
                        reason: format!("cluster {cluster} unreadable: {error}"),
                    });
                }
            };

            let take = bytes_per_cluster.min(expected - written) as usize;
            output.write_all(&data[..take])?;
            written += take as u64;
            if written == expected {
                break;
            }
        }

        if written < expected {
            return Err(Error::PartialRecovery {
                written,
                expected,
                reason: chain.end.label().to_string(),
            });
        }
        Ok(written)
    }
}
