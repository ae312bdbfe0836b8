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

use std::{
    path::{Path, PathBuf},
    process,
};

use clap::{value_parser, Arg, Command};
use log::info;

use marten_ds::DataStorage;
use marten_ds_file::FileStorage;
use marten_fs::{
    partition::Mbr,
    progress::{Progress, RecoveryEvent, RecoverySummary},
    Error, Result,
};
use marten_fs_fat::Volume;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    env_logger::init();

    let matches = Command::new("marten-recover")
        .about("Recovers live and deleted files from a FAT16 evidence image")
        .arg(
            Arg::new("image")
                .help("Raw image containing an MBR and a FAT16 volume")
                .required(true),
        )
        .arg(
            Arg::new("recovery-root")
                .help("Directory the recovered tree is materialized under")
                .required(true),
        )
        .arg(
            Arg::new("partition")
                .long("partition")
                .short('p')
                .value_parser(value_parser!(usize))
                .help("MBR partition slot (0-3) to mount instead of the first FAT16 entry"),
        )
        .get_matches();

    let image = matches.get_one::<String>("image").unwrap();
    let recovery_root = PathBuf::from(matches.get_one::<String>("recovery-root").unwrap());
    let partition = matches.get_one::<usize>("partition").copied();

    match recover(image, &recovery_root, partition) {
        Ok(summary) => {
            println!("{summary}");
            0
        }
        Err(error) => {
            eprintln!("error: {error}");
            exit_code(&error)
        }
    }
}

fn recover(
    image: &str,
    recovery_root: &Path,
    partition: Option<usize>,
) -> Result<RecoverySummary> {
    let storage = FileStorage::open(image)?;
    info!("image {image} ({} bytes)", storage.size()?);

    let mbr = Mbr::decode(&storage)?;
    for entry in &mbr.partitions {
        info!(
            "partition {}: {} (0x{:02X}) at LBA {}, {} sectors{}",
            entry.slot,
            entry.description(),
            entry.type_id,
            entry.start_lba,
            entry.sector_count,
            if entry.bootable { ", bootable" } else { "" }
        );
    }

    let entry = mbr.select(partition)?;
    let volume = Volume::mount(storage, entry)?;
    info!("{}", volume.geometry());

    volume.recover_to(recovery_root, &mut StdoutProgress)
}

fn exit_code(error: &Error) -> i32 {
    match error {
        Error::UnsupportedFs(_) => 2,
        Error::Io(_) => 3,
        _ => 1,
    }
}

/// Prints per-file outcomes the way the log facade would not: always, and
/// on stdout.
struct StdoutProgress;

impl Progress for StdoutProgress {
    fn event(&mut self, event: RecoveryEvent<'_>) {
        match event {
            RecoveryEvent::DirectoryEntered { path, lba } => {
                if path.as_os_str().is_empty() {
                    println!("==> scanning (root) (LBA {lba})");
                } else {
                    println!("==> scanning {} (LBA {lba})", path.display());
                }
            }
            RecoveryEvent::FileRecovered { path, bytes } => {
                println!(" [+] recovered {} ({bytes} bytes)", path.display());
            }
            RecoveryEvent::FilePartial {
                path,
                written,
                expected,
                reason,
            } => {
                println!(
                    " [~] partial   {} ({written} of {expected} bytes, {reason})",
                    path.display()
                );
            }
            RecoveryEvent::FileFailed { path, error } => {
                println!(" [!] failed    {}: {error}", path.display());
            }
        }
    }
}
