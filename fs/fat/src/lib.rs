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

use std::{fs, path::Path};

use log::{error, warn};
use zerocopy::{transmute_ref, FromBytes, FromZeros, IntoBytes};

use marten_ds::DataStorage;
use marten_fs::{
    partition::{PartitionEntry, MBR_SIZE},
    progress::{Progress, RecoveryEvent, RecoverySummary},
    Error, Result,
};

use boot_sector::{BootSector, FatKind, Geometry};
use dir::{DirEntry, EntryStatus, LongNameEntry};
use name::{sanitize, short_name, LongNameBuilder};
use table::{Cluster, FatTable};

pub mod boot_sector;
pub mod dir;
pub mod name;
pub mod table;

mod recover;

/// Directory nesting bound. A forged subdirectory cluster can point back up
/// the tree; past this depth the walk prunes instead of recursing further.
const MAX_DEPTH: usize = 64;

/// A mounted FAT16 volume: the evidence image, the geometry derived from
/// its boot sector, and the FAT read into memory once. All state is fixed
/// at mount; every operation takes the volume by reference.
pub struct Volume<DS: DataStorage> {
    storage: DS,
    geometry: Geometry,
    fat: FatTable,
}

impl<DS: DataStorage> Volume<DS> {
    /// Parses the boot sector of `partition` and loads the first FAT.
    ///
    /// The partition must carry one of the FAT16 type ids, and the volume's
    /// own cluster count must agree; a mislabeled FAT12 or FAT32 volume is
    /// rejected with [`Error::UnsupportedFs`] instead of being mis-parsed.
    pub fn mount(storage: DS, partition: &PartitionEntry) -> Result<Self> {
        if !partition.is_fat16() {
            return Err(Error::UnsupportedFs(partition.type_id));
        }

        let mut boot_sector = BootSector::new_zeroed();
        storage.read(
            partition.start_lba as u64 * MBR_SIZE as u64,
            boot_sector.as_mut_bytes(),
        )?;
        if boot_sector.signature_word != [0x55, 0xAA] {
            warn!("boot sector signature is not 55AA");
        }

        let geometry = Geometry::derive(&boot_sector, partition.start_lba as u64)?;
        if geometry.fat_kind() != FatKind::Fat16 {
            error!(
                "cluster count {} implies {:?}, not FAT16",
                geometry.cluster_count,
                geometry.fat_kind()
            );
            return Err(Error::UnsupportedFs(partition.type_id));
        }

        let mut fat_data =
            vec![0u8; geometry.fat_size_sectors as usize * geometry.sector_size as usize];
        storage.read(
            geometry.fat1_start_lba * geometry.sector_size as u64,
            &mut fat_data,
        )?;
        let fat = FatTable::new(fat_data, geometry.max_cluster);

        Ok(Self {
            storage,
            geometry,
            fat,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fat(&self) -> &FatTable {
        &self.fat
    }

    /// Releases the underlying storage.
    pub fn into_storage(self) -> DS {
        self.storage
    }

    /// Reads `count` whole sectors starting at the absolute address `lba`.
    pub(crate) fn read_sectors(&self, lba: u64, count: u32) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; count as usize * self.geometry.sector_size as usize];
        self.storage
            .read(lba * self.geometry.sector_size as u64, &mut buffer)?;
        Ok(buffer)
    }

    /// Walks the directory tree and materializes every reachable file, live
    /// or deleted, under `recovery_root`, reporting per-file outcomes on
    /// `progress`.
    ///
    /// Only a recovery root that cannot be created is fatal; everything
    /// else is reported for the offending entry and the walk continues, so
    /// a damaged volume yields as much as it still holds.
    pub fn recover_to(
        &self,
        recovery_root: &Path,
        progress: &mut dyn Progress,
    ) -> Result<RecoverySummary> {
        fs::create_dir_all(recovery_root)?;
        let mut summary = RecoverySummary::default();
        self.walk_directory(
            None,
            Path::new(""),
            recovery_root,
            0,
            progress,
            &mut summary,
        );
        Ok(summary)
    }

    /// Reads the record area of one directory: the fixed root region for
    /// `None`, the full cluster chain for a subdirectory. A deleted
    /// subdirectory whose FAT link was wiped degrades to its first cluster.
    fn directory_data(&self, dir: Option<Cluster>) -> Result<(u64, Vec<u8>)> {
        let Some(first_cluster) = dir else {
            let lba = self.geometry.root_dir_lba;
            return Ok((lba, self.read_sectors(lba, self.geometry.root_dir_sectors)?));
        };

        let chain = self.fat.chain(first_cluster);
        if chain.end.is_suspicious() {
            warn!("directory cluster {first_cluster}: {}", chain.end.label());
        }
        if chain.is_empty() {
            return Err(Error::RecoverFailed(
                "directory first cluster is outside the data region",
            ));
        }

        let mut data = Vec::with_capacity(
            chain.clusters.len() * self.geometry.bytes_per_cluster() as usize,
        );
        for (index, &cluster) in chain.clusters.iter().enumerate() {
            let lba = self.geometry.cluster_lba(cluster);
            match self.read_sectors(lba, self.geometry.sectors_per_cluster) {
                Ok(sectors) => data.extend_from_slice(&sectors),
                Err(error) if index == 0 => return Err(error),
                Err(error) => {
                    // Keep what was read; the records so far are still good.
                    warn!("directory cluster {cluster} unreadable: {error}");
                    break;
                }
            }
        }
        Ok((self.geometry.cluster_lba(first_cluster), data))
    }

    fn walk_directory(
        &self,
        dir: Option<Cluster>,
        rel_path: &Path,
        recovery_root: &Path,
        depth: usize,
        progress: &mut dyn Progress,
        summary: &mut RecoverySummary,
    ) {
        let (lba, data) = match self.directory_data(dir) {
            Ok(directory) => directory,
            Err(error) => {
                warn!("failed to read directory {}: {error}", rel_path.display());
                return;
            }
        };
        summary.directories += 1;
        progress.event(RecoveryEvent::DirectoryEntered {
            path: rel_path,
            lba,
        });

        let mut long_name = LongNameBuilder::default();
        for record in data.chunks_exact(size_of::<DirEntry>()) {
            let Ok(entry) = DirEntry::ref_from_bytes(record) else {
                break;
            };
            // 0x00 marks the end of the directory; nothing follows it.
            if entry.status() == EntryStatus::End {
                break;
            }

            if entry.is_long_name() {
                let fragment: &LongNameEntry = transmute_ref!(entry);
                // A deleted fragment lost its sequence byte and cannot be
                // placed; live fragments are kept even before a deleted
                // short-name entry.
                if !fragment.is_deleted() {
                    long_name.push(fragment);
                }
                continue;
            }

            // Every non-long-name record consumes the pending fragments,
            // even when it is skipped below.
            let assembled = long_name.take();
            if entry.is_volume_label() {
                continue;
            }

            let is_deleted = entry.is_deleted();
            let file_name = sanitize(&assembled.unwrap_or_else(|| short_name(entry, is_deleted)));
            if file_name.is_empty() || file_name == "." || file_name == ".." {
                continue;
            }
            let entry_path = rel_path.join(&file_name);
            let start_cluster = entry.first_cluster();

            if entry.is_directory() {
                if start_cluster < 2 {
                    continue;
                }
                if depth + 1 > MAX_DEPTH {
                    warn!(
                        "directory {} exceeds the nesting bound, not descending",
                        entry_path.display()
                    );
                    continue;
                }
                if let Err(error) = fs::create_dir_all(recovery_root.join(&entry_path)) {
                    summary.files_failed += 1;
                    progress.event(RecoveryEvent::FileFailed {
                        path: &entry_path,
                        error: &Error::Io(error),
                    });
                    continue;
                }
                self.walk_directory(
                    Some(start_cluster),
                    &entry_path,
                    recovery_root,
                    depth + 1,
                    progress,
                    summary,
                );
            } else if entry.size() > 0 && start_cluster >= 2 {
                let destination = recovery_root.join(&entry_path);
                match self.recover_file(start_cluster, entry.size(), &destination) {
                    Ok(bytes) => {
                        summary.files_recovered += 1;
                        summary.bytes_recovered += bytes;
                        progress.event(RecoveryEvent::FileRecovered {
                            path: &entry_path,
                            bytes,
                        });
                    }
                    Err(Error::PartialRecovery {
                        written,
                        expected,
                        reason,
                    }) => {
                        summary.files_partial += 1;
                        summary.bytes_recovered += written;
                        progress.event(RecoveryEvent::FilePartial {
                            path: &entry_path,
                            written,
                            expected,
                            reason: &reason,
                        });
                    }
                    Err(error) => {
                        summary.files_failed += 1;
                        progress.event(RecoveryEvent::FileFailed {
                            path: &entry_path,
                            error: &error,
                        });
                    }
                }
            }
            // A zero-length file or a zero start cluster leaves nothing to
            // recover.
        }
    }
}
