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

//! Mount-to-recovery runs against a synthetic image: an MBR, a FAT16
//! volume with live, deleted and long-named entries, and a damaged chain.

use std::{fs, path::PathBuf, process};

use marten_ds::DataStorage;
use marten_fs::{
    partition::Mbr,
    progress::{Progress, RecoveryEvent},
    Error, Result,
};
use marten_fs_fat::Volume;

const SECTOR: usize = 512;
const PARTITION_START: usize = 8;
const RESERVED: usize = 4;
const FAT_SIZE: usize = 18;
const ROOT_ENTRIES: u16 = 32;
// Enough data sectors (one per cluster) to land in FAT16 territory.
const TOTAL_SECTORS: u16 = 4500;

const FAT1: usize = PARTITION_START + RESERVED;
const ROOT: usize = FAT1 + 2 * FAT_SIZE;
const DATA: usize = ROOT + 2;

struct MemoryStorage(Vec<u8>);

impl DataStorage for MemoryStorage {
    fn size(&self) -> Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let Some(data) = self.0.get(start..start + buffer.len()) else {
            return Err(Error::NotEnoughData {
                offset,
                len: buffer.len(),
            });
        };
        buffer.copy_from_slice(data);
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl Progress for Recorder {
    fn event(&mut self, event: RecoveryEvent<'_>) {
        match event {
            RecoveryEvent::DirectoryEntered { path, .. } => {
                self.events.push(format!(">{}", path.display()));
            }
            RecoveryEvent::FileRecovered { path, bytes } => {
                self.events.push(format!("+{} {bytes}", path.display()));
            }
            RecoveryEvent::FilePartial { path, written, .. } => {
                self.events.push(format!("~{} {written}", path.display()));
            }
            RecoveryEvent::FileFailed { path, .. } => {
                self.events.push(format!("!{}", path.display()));
            }
        }
    }
}

fn dir_entry(name: &[u8; 11], attributes: u8, start_cluster: u16, size: u32) -> [u8; 32] {
    let mut record = [0u8; 32];
    record[..11].copy_from_slice(name);
    record[0x0B] = attributes;
    record[0x1A..0x1C].copy_from_slice(&start_cluster.to_le_bytes());
    record[0x1C..0x20].copy_from_slice(&size.to_le_bytes());
    record
}

fn lfn_entry(sequence: u8, text: &str) -> [u8; 32] {
    let mut record = [0u8; 32];
    record[0] = sequence;
    record[0x0B] = 0x0F;
    let mut units: Vec<u16> = text.encode_utf16().collect();
    assert!(units.len() <= 13);
    if units.len() < 13 {
        units.push(0x0000);
        units.resize(13, 0xFFFF);
    }
    for (index, unit) in units.iter().enumerate() {
        let offset = match index {
            0..=4 => 0x01 + index * 2,
            5..=10 => 0x0E + (index - 5) * 2,
            _ => 0x1C + (index - 11) * 2,
        };
        record[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
    }
    record
}

struct ImageBuilder {
    bytes: Vec<u8>,
}

impl ImageBuilder {
    fn new() -> Self {
        let mut builder = Self {
            bytes: vec![0u8; (PARTITION_START + TOTAL_SECTORS as usize) * SECTOR],
        };
        builder.write_mbr();
        builder.write_boot_sector();
        builder.set_fat(0, 0xFFF8);
        builder.set_fat(1, 0xFFFF);
        builder
    }

    fn write_mbr(&mut self) {
        let entry = &mut self.bytes[0x1BE..0x1CE];
        entry[0] = 0x80;
        entry[4] = 0x06;
        entry[8..12].copy_from_slice(&(PARTITION_START as u32).to_le_bytes());
        entry[12..16].copy_from_slice(&(TOTAL_SECTORS as u32).to_le_bytes());
        self.bytes[0x1FE] = 0x55;
        self.bytes[0x1FF] = 0xAA;
    }

    fn write_boot_sector(&mut self) {
        let sector = &mut self.bytes[PARTITION_START * SECTOR..(PARTITION_START + 1) * SECTOR];
        sector[0x0B..0x0D].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        sector[0x0D] = 1;
        sector[0x0E..0x10].copy_from_slice(&(RESERVED as u16).to_le_bytes());
        sector[0x10] = 2;
        sector[0x11..0x13].copy_from_slice(&ROOT_ENTRIES.to_le_bytes());
        sector[0x13..0x15].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
        sector[0x16..0x18].copy_from_slice(&(FAT_SIZE as u16).to_le_bytes());
        sector[0x1FE] = 0x55;
        sector[0x1FF] = 0xAA;
    }

    fn set_fat(&mut self, cluster: usize, value: u16) {
        for copy in 0..2 {
            let offset = (FAT1 + copy * FAT_SIZE) * SECTOR + cluster * 2;
            self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn put_record(&mut self, sector: usize, slot: usize, record: &[u8; 32]) {
        let offset = sector * SECTOR + slot * 32;
        self.bytes[offset..offset + 32].copy_from_slice(record);
    }

    fn put_cluster(&mut self, cluster: usize, data: &[u8]) {
        assert!(data.len() <= SECTOR);
        let offset = (DATA + cluster - 2) * SECTOR;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn cluster_sector(cluster: usize) -> usize {
        DATA + cluster - 2
    }
}

/// Root: a volume label, a live two-cluster file, a long-named
/// subdirectory spanning two clusters, two deleted files (one recoverable,
/// one with a wiped chain), a long name needing sanitization, and a
/// zero-length file.
fn build_image() -> MemoryStorage {
    let mut image = ImageBuilder::new();

    image.put_record(ROOT, 0, &dir_entry(b"EVIDENCE   ", 0x08, 0, 0));

    // 700 bytes across clusters 2 and 3; the tail of cluster 3 is slack.
    image.put_record(ROOT, 1, &dir_entry(b"README  TXT", 0x20, 2, 700));
    image.set_fat(2, 3);
    image.set_fat(3, 0xFFFF);
    image.put_cluster(2, &[b'A'; SECTOR]);
    image.put_cluster(3, &[b'B'; SECTOR]);

    image.put_record(ROOT, 2, &lfn_entry(0x41, "Documents"));
    image.put_record(ROOT, 3, &dir_entry(b"DOCUME~1   ", 0x10, 4, 0));
    image.set_fat(4, 10);
    image.set_fat(10, 0xFFFF);

    // Deleted macOS resource fork, chain wiped but within one cluster.
    image.put_record(
        ROOT,
        4,
        &dir_entry(&[0xE5, 0x5F, b'r', b'e', b's', b'_', 0x20, 0x20, 0x20, 0x20, 0x20], 0x20, 5, 10),
    );
    image.put_cluster(5, b"0123456789");

    // Deleted file larger than one cluster; only the first cluster is
    // still reachable.
    image.put_record(
        ROOT,
        5,
        &dir_entry(&[0xE5, b'I', b'G', b'F', b'I', b'L', b'E', b' ', b'B', b'I', b'N'], 0x20, 6, 2000),
    );
    image.put_cluster(6, &[b'C'; SECTOR]);

    image.put_record(ROOT, 6, &lfn_entry(0x41, "bad?name.txt"));
    image.put_record(ROOT, 7, &dir_entry(b"BAD_NA~1TXT", 0x20, 7, 4));
    image.set_fat(7, 0xFFFF);
    image.put_cluster(7, b"data");

    image.put_record(ROOT, 8, &dir_entry(b"EMPTY   TXT", 0x20, 0, 0));

    // Subdirectory, first cluster full so the walk must follow the chain.
    let documents = ImageBuilder::cluster_sector(4);
    image.put_record(documents, 0, &dir_entry(b".          ", 0x10, 4, 0));
    image.put_record(documents, 1, &dir_entry(b"..         ", 0x10, 0, 0));
    image.put_record(documents, 2, &lfn_entry(0x42, "o.txt"));
    image.put_record(documents, 3, &lfn_entry(0x01, "hell"));
    image.put_record(documents, 4, &dir_entry(b"HELLO~1 TXT", 0x20, 8, 5));
    image.set_fat(8, 0xFFFF);
    image.put_cluster(8, b"world");

    // Deleted subdirectory; its cluster holds only the end marker.
    image.put_record(
        documents,
        5,
        &dir_entry(&[0xE5, b'O', b'L', b'D', b'D', b'I', b'R', b' ', b' ', b' ', b' '], 0x10, 9, 0),
    );

    for filler in 0..10 {
        image.put_record(
            documents,
            6 + filler,
            &dir_entry(
                &[0xE5, b'F', b'I', b'L', b'L', b'0' + filler as u8, b' ', b' ', b' ', b' ', b' '],
                0x20,
                0,
                0,
            ),
        );
    }

    let documents_tail = ImageBuilder::cluster_sector(10);
    image.put_record(documents_tail, 0, &dir_entry(b"TAIL    TXT", 0x20, 11, 3));
    image.set_fat(11, 0xFFFF);
    image.put_cluster(11, b"abc");

    MemoryStorage(image.bytes)
}

fn temp_recovery_root(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("marten-fat-{}-{tag}", process::id()));
    if path.exists() {
        fs::remove_dir_all(&path).unwrap();
    }
    path
}

#[test]
fn recovers_synthetic_volume() {
    let storage = build_image();
    let mbr = Mbr::decode(&storage).unwrap();
    assert!(mbr.signature_valid);

    let partition = mbr.select(None).unwrap();
    assert_eq!(partition.start_lba as usize, PARTITION_START);

    let volume = Volume::mount(storage, partition).unwrap();
    let geometry = volume.geometry();
    assert_eq!(geometry.fat1_start_lba as usize, FAT1);
    assert_eq!(geometry.root_dir_lba as usize, ROOT);
    assert_eq!(geometry.data_region_lba as usize, DATA);
    assert_eq!(
        volume.fat().max_cluster() as u32,
        geometry.cluster_count + 1
    );

    let root = temp_recovery_root("full");
    let mut recorder = Recorder::default();
    let summary = volume.recover_to(&root, &mut recorder).unwrap();

    // Byte-exact truncation: the slack of the last cluster never reaches
    // the output.
    let readme = fs::read(root.join("README.TXT")).unwrap();
    assert_eq!(readme.len(), 700);
    assert!(readme[..512].iter().all(|&byte| byte == b'A'));
    assert!(readme[512..].iter().all(|&byte| byte == b'B'));

    // Long names win over short names, and host-unsafe characters are
    // replaced.
    assert_eq!(fs::read(root.join("Documents/hello.txt")).unwrap(), b"world");
    assert_eq!(fs::read(root.join("bad_name.txt")).unwrap(), b"data");

    // The second cluster of the subdirectory chain was walked.
    assert_eq!(fs::read(root.join("Documents/TAIL.TXT")).unwrap(), b"abc");

    // Deleted entries: restored prefix, recoverable payload.
    assert_eq!(fs::read(root.join("._res_")).unwrap(), b"0123456789");

    // Wiped chain: first cluster only, reported as partial.
    assert_eq!(fs::read(root.join("_IGFILE.BIN")).unwrap(), vec![b'C'; 512]);

    // Deleted subdirectory is entered, yielding nothing, silently.
    assert!(root.join("Documents/_OLDDIR").is_dir());

    // Zero-length files are not materialized.
    assert!(!root.join("EMPTY.TXT").exists());

    assert_eq!(summary.directories, 3);
    assert_eq!(summary.files_recovered, 5);
    assert_eq!(summary.files_partial, 1);
    assert_eq!(summary.files_failed, 0);
    assert_eq!(summary.bytes_recovered, 700 + 5 + 3 + 10 + 4 + 512);

    // Entries surface in on-disk order.
    assert_eq!(
        recorder.events,
        vec![
            ">".to_string(),
            "+README.TXT 700".to_string(),
            ">Documents".to_string(),
            "+Documents/hello.txt 5".to_string(),
            ">Documents/_OLDDIR".to_string(),
            "+Documents/TAIL.TXT 3".to_string(),
            "+._res_ 10".to_string(),
            "~_IGFILE.BIN 512".to_string(),
            "+bad_name.txt 4".to_string(),
        ]
    );

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn forged_directory_loop_is_pruned() {
    // A subdirectory whose record points back at its own cluster: every
    // level of the walk re-enters cluster 2, so only the nesting bound
    // stops the recursion.
    let mut image = ImageBuilder::new();
    image.put_record(ROOT, 0, &dir_entry(b"LOOP       ", 0x10, 2, 0));
    image.set_fat(2, 0xFFFF);
    let loop_dir = ImageBuilder::cluster_sector(2);
    image.put_record(loop_dir, 0, &dir_entry(b"LOOP       ", 0x10, 2, 0));

    let storage = MemoryStorage(image.bytes);
    let mbr = Mbr::decode(&storage).unwrap();
    let partition = mbr.select(None).unwrap().clone();
    let volume = Volume::mount(storage, &partition).unwrap();

    let root = temp_recovery_root("loop");
    let summary = volume
        .recover_to(&root, &mut marten_fs::progress::LogProgress)
        .unwrap();

    // The root plus one visit per accepted level: the walk descended 64
    // times and then pruned instead of looping.
    assert_eq!(summary.directories, 65);
    assert_eq!(summary.files_recovered, 0);
    assert_eq!(summary.files_failed, 0);

    // 64 nested host directories were created; the 65th never was.
    let mut deep = root.clone();
    for _ in 0..64 {
        deep.push("LOOP");
    }
    assert!(deep.is_dir());
    deep.push("LOOP");
    assert!(!deep.exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn undersized_image_is_invalid() {
    let storage = MemoryStorage(vec![0u8; 100]);
    assert!(matches!(
        Mbr::decode(&storage),
        Err(Error::InvalidImage(_))
    ));
}

#[test]
fn non_fat16_partition_is_rejected() {
    let mut image = build_image();
    // Relabel the only partition as FAT32.
    image.0[0x1BE + 4] = 0x0B;
    let mbr = Mbr::decode(&image).unwrap();
    assert!(matches!(mbr.select(None), Err(Error::UnsupportedFs(0x0B))));
}

#[test]
fn source_image_is_never_written() {
    let storage = build_image();
    let before = storage.0.clone();

    let mbr = Mbr::decode(&storage).unwrap();
    let partition = mbr.select(None).unwrap().clone();
    let volume = Volume::mount(storage, &partition).unwrap();

    let root = temp_recovery_root("readonly");
    volume
        .recover_to(&root, &mut marten_fs::progress::LogProgress)
        .unwrap();
    fs::remove_dir_all(&root).unwrap();

    // The trait offers no write path; the buffer behind the volume must be
    // untouched bit for bit.
    assert_eq!(volume.into_storage().0, before);
}
