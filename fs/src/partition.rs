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

use log::warn;
use marten_ds::DataStorage;
use zerocopy::{little_endian::U32, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{Error, Result};

/// The master boot record occupies the first 512 bytes of the image,
/// regardless of the sector size any contained volume later claims.
pub const MBR_SIZE: usize = 512;

const PARTITION_TABLE_OFFSET: usize = 0x1BE;
const SIGNATURE_OFFSET: usize = 0x1FE;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct RawPartitionEntry {
    /// 0x80 marks the entry bootable (active), 0x00 inactive. Other values
    /// occur in the wild and are simply treated as inactive.
    boot_flag: u8,
    /// CHS address of the first sector. Obsolete, never interpreted.
    chs_first: [u8; 3],
    /// Partition type id, see [`PartitionKind`].
    type_id: u8,
    /// CHS address of the last sector. Obsolete, never interpreted.
    chs_last: [u8; 3],
    /// First sector of the partition as a zero-based LBA.
    start_lba: U32,
    /// Length of the partition in sectors.
    sector_count: U32,
}

/// Coarse classification of the well-known partition type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Fat16,
    Fat32,
    NtfsExfat,
    Extended,
    Unknown,
}

/// One used slot of the MBR partition table.
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    /// Table slot, 0 through 3.
    pub slot: usize,
    pub bootable: bool,
    pub type_id: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn kind(&self) -> PartitionKind {
        match self.type_id {
            0x04 | 0x06 | 0x0E => PartitionKind::Fat16,
            0x0B | 0x0C => PartitionKind::Fat32,
            0x07 => PartitionKind::NtfsExfat,
            0x05 | 0x0F => PartitionKind::Extended,
            _ => PartitionKind::Unknown,
        }
    }

    pub fn is_fat16(&self) -> bool {
        self.kind() == PartitionKind::Fat16
    }

    pub fn description(&self) -> &'static str {
        match self.type_id {
            0x04 => "FAT16 (less than 32MB)",
            0x06 => "FAT16",
            0x0E => "FAT16 LBA",
            0x0B => "FAT32",
            0x0C => "FAT32 LBA",
            0x07 => "NTFS / exFAT / HPFS",
            0x05 => "Extended DOS partition",
            0x0F => "Extended LBA partition",
            _ => "Unknown",
        }
    }
}

/// Decoded master boot record.
#[derive(Debug)]
pub struct Mbr {
    /// Whether the trailing 0x55 0xAA signature was present. A missing
    /// signature is reported but does not stop decoding; damaged evidence
    /// images frequently lack it.
    pub signature_valid: bool,
    /// The used partition table slots, in table order.
    pub partitions: Vec<PartitionEntry>,
}

impl Mbr {
    /// Reads and decodes the first sector of the image.
    ///
    /// Fails with [`Error::InvalidImage`] only if the image is shorter than
    /// one sector.
    pub fn decode<DS: DataStorage>(storage: &DS) -> Result<Self> {
        let mut sector = [0u8; MBR_SIZE];
        storage.read(0, &mut sector).map_err(|error| match error {
            Error::NotEnoughData { .. } => Error::InvalidImage("image is smaller than one sector"),
            other => other,
        })?;
        Ok(Self::parse(&sector))
    }

    /// Decodes an in-memory copy of the boot record.
    pub fn parse(sector: &[u8; MBR_SIZE]) -> Self {
        let signature_valid = sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] == SIGNATURE;
        if !signature_valid {
            warn!(
                "MBR signature is {:02X}{:02X} instead of 55AA",
                sector[SIGNATURE_OFFSET],
                sector[SIGNATURE_OFFSET + 1]
            );
        }

        let mut partitions = Vec::new();
        for slot in 0..4 {
            let offset = PARTITION_TABLE_OFFSET + slot * size_of::<RawPartitionEntry>();
            let raw_entry = &sector[offset..offset + size_of::<RawPartitionEntry>()];
            // An all-zero slot is unused.
            if raw_entry.iter().all(|&byte| byte == 0) {
                continue;
            }
            let Ok(entry) = RawPartitionEntry::ref_from_bytes(raw_entry) else {
                continue;
            };
            partitions.push(PartitionEntry {
                slot,
                bootable: entry.boot_flag == 0x80,
                type_id: entry.type_id,
                start_lba: entry.start_lba.get(),
                sector_count: entry.sector_count.get(),
            });
        }

        Self {
            signature_valid,
            partitions,
        }
    }

    /// The first partition whose type id is one of the FAT16 codes.
    pub fn first_fat16(&self) -> Option<&PartitionEntry> {
        self.partitions.iter().find(|entry| entry.is_fat16())
    }

    /// Picks the partition to mount: the given table slot, or the first
    /// FAT16 entry when no slot is given.
    ///
    /// An explicitly selected partition of another type fails with
    /// [`Error::UnsupportedFs`], so a mislabeled volume is rejected instead
    /// of mis-parsed.
    pub fn select(&self, slot: Option<usize>) -> Result<&PartitionEntry> {
        match slot {
            Some(slot) => {
                let entry = self
                    .partitions
                    .iter()
                    .find(|entry| entry.slot == slot)
                    .ok_or(Error::InvalidImage("selected partition slot is unused"))?;
                if !entry.is_fat16() {
                    return Err(Error::UnsupportedFs(entry.type_id));
                }
                Ok(entry)
            }
            None => self.first_fat16().ok_or_else(|| {
                match self.partitions.first() {
                    Some(entry) => Error::UnsupportedFs(entry.type_id),
                    None => Error::InvalidImage("no partition table entries"),
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_with_entry(entry: &[u8; 16]) -> [u8; MBR_SIZE] {
        let mut sector = [0u8; MBR_SIZE];
        sector[PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + 16].copy_from_slice(entry);
        sector[SIGNATURE_OFFSET] = 0x55;
        sector[SIGNATURE_OFFSET + 1] = 0xAA;
        sector
    }

    #[test]
    fn test_decode_single_fat16_entry() {
        let sector = sector_with_entry(&[
            0x80, 0x01, 0x01, 0x00, 0x06, 0xFE, 0x3F, 0x02, 0x27, 0x00, 0x00, 0x00, 0xC0, 0xFF,
            0x1F, 0x00,
        ]);
        let mbr = Mbr::parse(&sector);

        assert!(mbr.signature_valid);
        assert_eq!(mbr.partitions.len(), 1);
        let entry = &mbr.partitions[0];
        assert!(entry.bootable);
        assert_eq!(entry.type_id, 0x06);
        assert_eq!(entry.kind(), PartitionKind::Fat16);
        assert_eq!(entry.start_lba, 39);
        assert_eq!(entry.sector_count, 0x001FFFC0);
    }

    #[test]
    fn test_unused_slots_are_skipped() {
        let mut sector = sector_with_entry(&[
            0x00, 0x01, 0x01, 0x00, 0x06, 0xFE, 0x3F, 0x02, 0x27, 0x00, 0x00, 0x00, 0xC0, 0xFF,
            0x1F, 0x00,
        ]);
        // Second slot: NTFS, third and fourth all zero.
        sector[PARTITION_TABLE_OFFSET + 16 + 4] = 0x07;
        sector[PARTITION_TABLE_OFFSET + 16 + 8] = 0x39;
        let mbr = Mbr::parse(&sector);

        assert_eq!(mbr.partitions.len(), 2);
        assert_eq!(mbr.partitions[0].slot, 0);
        assert!(!mbr.partitions[0].bootable);
        assert_eq!(mbr.partitions[1].slot, 1);
        assert_eq!(mbr.partitions[1].kind(), PartitionKind::NtfsExfat);
    }

    #[test]
    fn test_missing_signature_is_not_fatal() {
        let mut sector = sector_with_entry(&[
            0x80, 0x01, 0x01, 0x00, 0x06, 0xFE, 0x3F, 0x02, 0x27, 0x00, 0x00, 0x00, 0xC0, 0xFF,
            0x1F, 0x00,
        ]);
        sector[SIGNATURE_OFFSET] = 0;
        sector[SIGNATURE_OFFSET + 1] = 0;
        let mbr = Mbr::parse(&sector);

        assert!(!mbr.signature_valid);
        assert_eq!(mbr.partitions.len(), 1);
    }

    #[test]
    fn test_select_defaults_to_first_fat16() {
        let mut sector = sector_with_entry(&[
            0x00, 0x01, 0x01, 0x00, 0x07, 0xFE, 0x3F, 0x02, 0x27, 0x00, 0x00, 0x00, 0xC0, 0xFF,
            0x1F, 0x00,
        ]);
        sector[PARTITION_TABLE_OFFSET + 16 + 4] = 0x0E;
        sector[PARTITION_TABLE_OFFSET + 16 + 8] = 0x40;
        let mbr = Mbr::parse(&sector);

        let entry = mbr.select(None).unwrap();
        assert_eq!(entry.slot, 1);
        assert_eq!(entry.start_lba, 0x40);

        assert!(matches!(
            mbr.select(Some(0)),
            Err(Error::UnsupportedFs(0x07))
        ));
        assert!(matches!(mbr.select(Some(3)), Err(Error::InvalidImage(_))));
    }
}
