// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Based on https://docs.rs/crate/four-cc/latest, reduced to the V4L2
// little-endian packing used by pixel codes on the wire.
#![forbid(unsafe_code)]

use core::fmt;

/// A V4L2 pixel code, stored as the four ASCII characters that name it.
///
/// The kernel packs pixel codes as `a | b << 8 | c << 16 | d << 24`
/// (`v4l2_fourcc`), independent of host endianness.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(*code)
    }

    /// Kernel `v4l2_fourcc` packing of the code.
    pub const fn as_u32(self) -> u32 {
        (self.0[0] as u32)
            | (self.0[1] as u32) << 8
            | (self.0[2] as u32) << 16
            | (self.0[3] as u32) << 24
    }

    pub const fn from_u32(val: u32) -> Self {
        FourCC([
            (val & 0xff) as u8,
            (val >> 8 & 0xff) as u8,
            (val >> 16 & 0xff) as u8,
            (val >> 24 & 0xff) as u8,
        ])
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                for b in self.0 {
                    write!(f, "{}", core::ascii::escape_default(b))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_packing() {
        assert_eq!(FourCC::new(b"YUYV").as_u32(), 0x5659_5559);
        assert_eq!(FourCC::new(b"NM12").as_u32(), 0x3231_4d4e);
        assert_eq!(FourCC::from_u32(0x5659_5559), FourCC::new(b"YUYV"));
    }

    #[test]
    fn test_display() {
        assert_eq!(FourCC::new(b"MBgA").to_string(), "MBgA");
        assert_eq!(format!("{:?}", FourCC::new(b"YV12")), "FourCC(YV12)");
        assert_eq!(FourCC([0xff, b'A', b'B', b'C']).to_string(), "\\xffABC");
    }
}
