use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::DEVNAME_MAXLEN;

/// Printable mirror set name, at most [`DEVNAME_MAXLEN`] - 1 bytes,
/// zero-padded. Names key the reconfiguration registry, so two instances of
/// the same device carry the same name across a table swap.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceName {
    bytes: [u8; DEVNAME_MAXLEN],
}

impl DeviceName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() >= DEVNAME_MAXLEN {
            return Err(Error::invalid("Invalid device name length"));
        }
        if !name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::invalid("Invalid device name"));
        }
        let mut bytes = [0u8; DEVNAME_MAXLEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { bytes })
    }

    pub fn as_str(&self) -> &str {
        let len = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DEVNAME_MAXLEN);
        // only constructed from validated ascii
        std::str::from_utf8(&self.bytes[..len]).unwrap_or("")
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceName({})", self.as_str())
    }
}

impl FromStr for DeviceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
