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

pub use marten_err::{Error, Result};

/// Positional, read-only access to an evidence image.
///
/// The trait has no write half: everything built on top of it treats the
/// image as immutable evidence.
pub trait DataStorage {
    /// Size of the image in bytes.
    fn size(&self) -> Result<u64>;

    /// Fills `buffer` with the bytes at `offset`.
    ///
    /// A read that would run past the end of the image fails with
    /// [`Error::NotEnoughData`]; implementations never return fewer bytes
    /// than requested.
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;
}
