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

use crate::dir::{DirEntry, LongNameEntry, ENTRY_E5_ESCAPE};

/// Accumulates long-name fragments while one directory is iterated.
///
/// Fragments precede their short-name entry on disk in reverse order; they
/// are collected as (sequence, text) pairs and only ordered when the name is
/// taken. The builder is drained unconditionally at every non-long-name
/// record, so stale fragments never leak onto a later entry.
#[derive(Debug, Default)]
pub struct LongNameBuilder {
    fragments: Vec<(u8, String)>,
}

impl LongNameBuilder {
    pub fn push(&mut self, entry: &LongNameEntry) {
        self.fragments
            .push((entry.sequence_index(), decode_fragment(entry)));
    }

    /// Assembles the accumulated fragments into a name and resets the
    /// builder. Returns `None` when nothing usable accumulated.
    pub fn take(&mut self) -> Option<String> {
        if self.fragments.is_empty() {
            return None;
        }
        let mut fragments = std::mem::take(&mut self.fragments);
        fragments.sort_by_key(|&(sequence, _)| sequence);
        let name = fragments
            .into_iter()
            .map(|(_, text)| text)
            .collect::<String>();
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Decodes the up-to-13 UTF-16LE code units of one fragment. The name runs
/// end at the first NUL; 0xFFFF padding fills unused trailing units.
fn decode_fragment(entry: &LongNameEntry) -> String {
    let units: Vec<u16> = entry
        .units()
        .take_while(|&unit| unit != 0x0000)
        .filter(|&unit| unit != 0xFFFF)
        .collect();
    char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Restores a displayable name from the 8.3 short-name bytes. `deleted` is
/// the walker's determination for this record ([`DirEntry::is_deleted`]).
///
/// The first byte of a deleted entry was overwritten with 0xE5, so the true
/// leading character is gone. When the second byte is '_' the entry was
/// most likely a macOS resource fork ("._name") and the dot is restored;
/// otherwise a '_' placeholder keeps the name printable.
pub fn short_name(entry: &DirEntry, deleted: bool) -> String {
    let mut bytes = entry.name;
    if deleted {
        bytes[0] = if bytes[1] == 0x5F { b'.' } else { b'_' };
    } else if bytes[0] == ENTRY_E5_ESCAPE {
        bytes[0] = 0xE5;
    }

    let base = decode_oem(&bytes[..8]);
    let extension = decode_oem(&bytes[8..]);
    if extension.is_empty() {
        base
    } else {
        format!("{base}.{extension}")
    }
}

/// ASCII with replacement: printable bytes pass through, anything else
/// becomes U+FFFD rather than being dropped, then the space padding is
/// trimmed.
fn decode_oem(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&byte| {
            if (0x20..0x7F).contains(&byte) {
                byte as char
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Replaces characters the host file system cannot take ('?', '/', '\')
/// with '_' and trims surrounding whitespace. The logical name reported on
/// the progress channel is sanitized the same way, so host paths and
/// reported paths agree.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '?' | '/' | '\\' => '_',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
