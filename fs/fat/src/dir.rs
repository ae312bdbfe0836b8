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

use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
/// Read-only | hidden | system | volume-id marks an auxiliary long-name
/// record, compared for equality, not as a mask.
pub const ATTR_LONG_NAME: u8 =
    ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

/// First name byte of a deleted entry.
pub const ENTRY_DELETED: u8 = 0xE5;
/// First name byte standing in for a literal 0xE5 (KANJI lead byte).
pub const ENTRY_E5_ESCAPE: u8 = 0x05;
/// In a long-name record, the bit marking the final name fragment.
pub const LAST_LONG_ENTRY: u8 = 0x40;

/// What the first name byte says about a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// 0x00: never used; also terminates the directory, nothing follows.
    End,
    /// 0xE5: deleted, remaining bytes usually intact.
    Deleted,
    Used,
}

/// One 32-byte directory record.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct DirEntry {
    /// 8.3 short name, space padded, no dot.
    pub name: [u8; 11],
    pub attributes: u8,
    pub nt_reserved: u8,
    pub creation_time_tenth: u8,
    pub creation_time: U16,
    pub creation_date: U16,
    pub last_access_date: U16,
    /// High word of the first cluster. Always zero on FAT16, and ignored
    /// here: deleted entries frequently carry stale garbage in it.
    pub first_cluster_high: U16,
    pub write_time: U16,
    pub write_date: U16,
    /// Low word of the first cluster, the whole number on FAT16.
    pub first_cluster_low: U16,
    pub file_size: U32,
}

impl DirEntry {
    pub fn status(&self) -> EntryStatus {
        match self.name[0] {
            0x00 => EntryStatus::End,
            ENTRY_DELETED => EntryStatus::Deleted,
            _ => EntryStatus::Used,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status() == EntryStatus::Deleted
    }

    pub fn is_long_name(&self) -> bool {
        self.attributes == ATTR_LONG_NAME
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & ATTR_VOLUME_ID != 0 && !self.is_long_name()
    }

    pub fn first_cluster(&self) -> u16 {
        self.first_cluster_low.get()
    }

    pub fn size(&self) -> u32 {
        self.file_size.get()
    }
}

/// Auxiliary long-name record, an overlay of [`DirEntry`] used when the
/// attribute byte equals [`ATTR_LONG_NAME`]. Carries up to 13 UTF-16LE code
/// units in three noncontiguous runs.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct LongNameEntry {
    /// 1-based fragment index in the low five bits; [`LAST_LONG_ENTRY`]
    /// marks the final fragment, which is the first to appear on disk.
    pub sequence: u8,
    pub name1: [U16; 5],
    pub attributes: u8,
    pub entry_kind: u8,
    /// Checksum over the short name this fragment belongs to. Not verified:
    /// on a damaged volume a mismatched fragment is still a better name
    /// than none.
    pub checksum: u8,
    pub name2: [U16; 6],
    pub first_cluster: U16,
    pub name3: [U16; 2],
}

impl LongNameEntry {
    pub fn sequence_index(&self) -> u8 {
        self.sequence & 0x1F
    }

    pub fn is_deleted(&self) -> bool {
        self.sequence == ENTRY_DELETED
    }

    /// The 13 code units in name order.
    pub fn units(&self) -> impl Iterator<Item = u16> + '_ {
        self.name1
            .iter()
            .chain(self.name2.iter())
            .chain(self.name3.iter())
            .map(|unit| unit.get())
    }
}
