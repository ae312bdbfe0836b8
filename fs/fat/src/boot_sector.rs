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

use std::fmt;

use log::warn;
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use marten_fs::{Error, Result};

/// First sector of a FAT12/16 volume: jump, OEM name, the BIOS parameter
/// block, the extended fields, and the trailing signature word.
///
/// Only the BPB is interpreted; the rest is carried so the layout covers the
/// full 512 bytes and the structure can be filled straight from storage.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct BootSector {
    /// x86 jump to the boot code, 0xEB ?? 0x90 or 0xE9 ?? ??.
    pub jump: [u8; 3],
    /// Name of the tool that formatted the volume. Informational.
    pub oem_name: [u8; 8],
    /// Bytes per sector. 512, 1024, 2048 or 4096; everything else is a
    /// corrupt or fake boot sector.
    pub bytes_per_sector: U16,
    /// Sectors per allocation unit, a power of two between 1 and 128.
    pub sectors_per_cluster: u8,
    /// Sectors before the first FAT, counted from the start of the volume.
    pub reserved_sectors: U16,
    /// Number of FAT copies, almost always 2.
    pub num_fats: u8,
    /// Capacity of the root directory in 32-byte entries. Nonzero on
    /// FAT12/16; zero is the telltale of a FAT32 volume.
    pub root_entry_count: U16,
    /// Total sectors if the volume is small enough to count them in 16 bits,
    /// otherwise zero and `total_sectors_large` holds the count.
    pub total_sectors_small: U16,
    /// Media descriptor. Legacy, never interpreted.
    pub media: u8,
    /// Sectors occupied by one FAT copy.
    pub fat_size_sectors: U16,
    /// CHS geometry for int 13h. Legacy, never interpreted.
    pub sectors_per_track: U16,
    /// See `sectors_per_track`.
    pub num_heads: U16,
    /// Sectors preceding this volume on the medium.
    pub hidden_sectors: U32,
    /// 32-bit total sector count, used when `total_sectors_small` is zero.
    pub total_sectors_large: U32,
    /// BIOS drive number.
    pub drive_number: u8,
    pub reserved: u8,
    /// 0x29 when the three fields below are present.
    pub extended_boot_signature: u8,
    /// Volume serial number.
    pub volume_id: U32,
    /// Matches the volume-label entry in the root directory, if any.
    pub volume_label: [u8; 11],
    /// "FAT16   " and friends. Informational only; the FAT type is decided
    /// by cluster count, never by this string.
    pub fs_type_label: [u8; 8],
    /// Boot code, opaque.
    pub boot_code: [u8; 448],
    /// 0x55 at offset 510, 0xAA at offset 511.
    pub signature_word: [u8; 2],
}

/// FAT flavor as decided by the data-region cluster count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatKind {
    Fat12,
    Fat16,
    Fat32,
}

/// Volume geometry, derived once from the boot sector and immutable for the
/// lifetime of the volume. All `*_lba` fields are absolute image sector
/// addresses.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub sector_size: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    pub root_entry_count: u32,
    pub fat_size_sectors: u32,
    pub total_sectors: u32,
    pub partition_start_lba: u64,
    pub fat1_start_lba: u64,
    pub root_dir_lba: u64,
    pub root_dir_sectors: u32,
    pub data_region_lba: u64,
    /// Data-region clusters, starting at cluster 2.
    pub cluster_count: u32,
    /// Highest cluster number a chain may contain.
    pub max_cluster: u16,
}

impl Geometry {
    /// Derives and validates the volume layout.
    pub fn derive(boot_sector: &BootSector, partition_start_lba: u64) -> Result<Self> {
        let sector_size = boot_sector.bytes_per_sector.get() as u32;
        if ![512, 1024, 2048, 4096].contains(&sector_size) {
            return Err(Error::InvalidGeometry(format!(
                "bytes per sector is {sector_size}, expected 512, 1024, 2048 or 4096"
            )));
        }
        if sector_size != 512 {
            warn!("sector size {sector_size} differs from the 512-byte partition addressing unit");
        }

        let sectors_per_cluster = boot_sector.sectors_per_cluster as u32;
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(Error::InvalidGeometry(format!(
                "sectors per cluster is {sectors_per_cluster}, expected a power of two up to 128"
            )));
        }

        let num_fats = boot_sector.num_fats as u32;
        if num_fats == 0 {
            return Err(Error::InvalidGeometry("no FAT copies".into()));
        }

        let fat_size_sectors = boot_sector.fat_size_sectors.get() as u32;
        if fat_size_sectors == 0 {
            return Err(Error::InvalidGeometry(
                "FAT size is zero sectors (FAT32 boot sector?)".into(),
            ));
        }

        let root_entry_count = boot_sector.root_entry_count.get() as u32;
        if root_entry_count == 0 {
            return Err(Error::InvalidGeometry(
                "root directory entry count is zero (FAT32 boot sector?)".into(),
            ));
        }
        if (root_entry_count * 32) % sector_size != 0 {
            return Err(Error::InvalidGeometry(format!(
                "root directory ({root_entry_count} entries) is not a whole number of sectors"
            )));
        }
        let root_dir_sectors = (root_entry_count * 32).div_ceil(sector_size);

        let total_sectors_small = boot_sector.total_sectors_small.get() as u32;
        let total_sectors = if total_sectors_small != 0 {
            total_sectors_small
        } else {
            boot_sector.total_sectors_large.get()
        };

        let reserved_sectors = boot_sector.reserved_sectors.get() as u32;
        let metadata_sectors = reserved_sectors + num_fats * fat_size_sectors + root_dir_sectors;
        let Some(data_sectors) = total_sectors.checked_sub(metadata_sectors) else {
            return Err(Error::InvalidGeometry(format!(
                "total sector count {total_sectors} is smaller than the {metadata_sectors} \
                 metadata sectors"
            )));
        };
        let cluster_count = data_sectors / sectors_per_cluster;

        let fat1_start_lba = partition_start_lba + reserved_sectors as u64;
        let root_dir_lba = fat1_start_lba + (num_fats * fat_size_sectors) as u64;
        let data_region_lba = root_dir_lba + root_dir_sectors as u64;

        Ok(Self {
            sector_size,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            root_entry_count,
            fat_size_sectors,
            total_sectors,
            partition_start_lba,
            fat1_start_lba,
            root_dir_lba,
            root_dir_sectors,
            data_region_lba,
            cluster_count,
            max_cluster: cluster_count.saturating_add(1).min(0xFFEF) as u16,
        })
    }

    /// The FAT flavor implied by the cluster count. Thresholds are the
    /// canonical ones: below 4085 clusters FAT12, below 65525 FAT16.
    pub fn fat_kind(&self) -> FatKind {
        if self.cluster_count < 4085 {
            FatKind::Fat12
        } else if self.cluster_count < 65525 {
            FatKind::Fat16
        } else {
            FatKind::Fat32
        }
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.sectors_per_cluster * self.sector_size
    }

    /// First sector of a data cluster. Clusters 0 and 1 do not exist in the
    /// data region; callers guarantee `cluster >= 2`.
    pub fn cluster_lba(&self, cluster: u16) -> u64 {
        self.data_region_lba + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} B/sector, {} sectors/cluster, FAT at LBA {} ({} x {} sectors), \
             root directory at LBA {} ({} sectors), data region at LBA {} ({} clusters)",
            self.sector_size,
            self.sectors_per_cluster,
            self.fat1_start_lba,
            self.num_fats,
            self.fat_size_sectors,
            self.root_dir_lba,
            self.root_dir_sectors,
            self.data_region_lba,
            self.cluster_count
        )
    }
}
