//! Fixed-capacity, NUL-padded name fields.
//!
//! Materials, segments and cached textures carry their names in fixed byte
//! blocks so that their records have a constant size on disk. [`FixedName`]
//! makes the capacity explicit: copying a longer string truncates it at the
//! last UTF-8 character boundary that fits, leaving at least one trailing NUL.

use std::fmt;

/// Capacity (in bytes, including the terminating NUL) of every name field.
pub const NAME_CAPACITY: usize = 64;

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FixedName([u8; NAME_CAPACITY]);

impl FixedName {
    pub const EMPTY: FixedName = FixedName([0; NAME_CAPACITY]);

    /// Copy `name` into a fixed block, silently truncating what does not fit.
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; NAME_CAPACITY];
        let mut len = name.len().min(NAME_CAPACITY - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self(bytes)
    }

    /// Rebuild a name from a raw on-disk block. Bytes after the first NUL are ignored.
    pub fn from_bytes(bytes: [u8; NAME_CAPACITY]) -> Self {
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY);
        let mut clean = [0u8; NAME_CAPACITY];
        clean[..len].copy_from_slice(&bytes[..len]);
        // A block without a terminator is clipped so the invariant holds.
        if len == NAME_CAPACITY {
            clean[NAME_CAPACITY - 1] = 0;
        }
        Self(clean)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_CAPACITY] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// The stored text. Invalid UTF-8 (only possible from a corrupt cache file)
    /// is cut at the first invalid byte.
    pub fn as_str(&self) -> &str {
        let bytes = &self.0[..self.len()];
        match std::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                // valid_up_to is always a char boundary
                std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default()
            }
        }
    }
}

impl Default for FixedName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<&str> for FixedName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for FixedName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}
