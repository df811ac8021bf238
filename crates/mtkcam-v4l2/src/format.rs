// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Image formats and color profiles understood by the ISP nodes, and the
//! static tables translating them into V4L2 pixel codes, colorspaces and
//! quantization ranges.
//!
//! The tables are immutable process-wide data:
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | [`FORMAT_TABLE`] | ([`ImageFormat`], [`BayerOrder`]) | V4L2 pixel code |
//! | [`PROFILE_TABLE`] | [`ColorProfile`] | (colorspace, quantization) |

use std::fmt;

use crate::fourcc::FourCC;

pub const V4L2_COLORSPACE_DEFAULT: u32 = 0;
pub const V4L2_COLORSPACE_REC709: u32 = 3;
pub const V4L2_COLORSPACE_JPEG: u32 = 7;
pub const V4L2_COLORSPACE_BT2020: u32 = 10;

pub const V4L2_QUANTIZATION_FULL_RANGE: u32 = 1;
pub const V4L2_QUANTIZATION_LIM_RANGE: u32 = 2;

pub const PIX_FMT_YUYV: FourCC = FourCC::new(b"YUYV");
pub const PIX_FMT_NV12M: FourCC = FourCC::new(b"NM12");
pub const PIX_FMT_YVU420: FourCC = FourCC::new(b"YV12");
pub const PIX_FMT_YVU420M: FourCC = FourCC::new(b"YM21");

/// Sensor color filter arrangement, needed to pick a bayer pixel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BayerOrder {
    Bggr,
    Gbrg,
    Grbg,
    Rggb,
}

/// Generic image formats produced or consumed by the camera pipeline.
///
/// Not every format has a pixel code; [`pixel_code`] returns `None` for those
/// and stream nodes reject them with
/// [`Error::UnsupportedFormat`](crate::Error::UnsupportedFormat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Yuy2,
    Nv12,
    Nv21,
    Yv12,
    /// Opaque metadata or tuning buffer, sized in bytes.
    Blob,
    Bayer8,
    Bayer10,
    Bayer12,
    Bayer14,
    /// Full-G bayer output of the P1 packed-out port.
    FgBayer8,
    FgBayer10,
    FgBayer12,
    FgBayer14,
}

impl ImageFormat {
    pub fn plane_count(self) -> usize {
        match self {
            ImageFormat::Nv12 | ImageFormat::Nv21 => 2,
            ImageFormat::Yv12 => 3,
            _ => 1,
        }
    }

    pub fn is_bayer(self) -> bool {
        self.bayer_bits().is_some()
    }

    fn bayer_bits(self) -> Option<u32> {
        match self {
            ImageFormat::Bayer8 | ImageFormat::FgBayer8 => Some(8),
            ImageFormat::Bayer10 | ImageFormat::FgBayer10 => Some(10),
            ImageFormat::Bayer12 | ImageFormat::FgBayer12 => Some(12),
            ImageFormat::Bayer14 | ImageFormat::FgBayer14 => Some(14),
            _ => None,
        }
    }

    fn is_full_g(self) -> bool {
        matches!(
            self,
            ImageFormat::FgBayer8
                | ImageFormat::FgBayer10
                | ImageFormat::FgBayer12
                | ImageFormat::FgBayer14
        )
    }

    /// Per-plane row strides in bytes for a tightly packed image.
    pub fn strides(self, width: u32) -> Vec<u32> {
        match self {
            ImageFormat::Yuy2 => vec![width * 2],
            ImageFormat::Nv12 | ImageFormat::Nv21 => vec![width, width],
            ImageFormat::Yv12 => vec![width, width / 2, width / 2],
            ImageFormat::Blob => vec![width],
            _ => {
                let bits = self.bayer_bits().unwrap_or(8);
                let pixels = if self.is_full_g() {
                    width * 3 / 2
                } else {
                    width
                };
                vec![(pixels * bits + 7) / 8]
            }
        }
    }

    /// Per-plane sizes in bytes for a tightly packed image.
    pub fn plane_sizes(self, width: u32, height: u32) -> Vec<u32> {
        let strides = self.strides(width);
        match self {
            ImageFormat::Nv12 | ImageFormat::Nv21 => {
                vec![strides[0] * height, strides[1] * height / 2]
            }
            ImageFormat::Yv12 => vec![
                strides[0] * height,
                strides[1] * height / 2,
                strides[2] * height / 2,
            ],
            ImageFormat::Blob => vec![width],
            _ => vec![strides[0] * height],
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Yuy2 => "YUY2",
            ImageFormat::Nv12 => "NV12",
            ImageFormat::Nv21 => "NV21",
            ImageFormat::Yv12 => "YV12",
            ImageFormat::Blob => "BLOB",
            ImageFormat::Bayer8 => "BAYER8",
            ImageFormat::Bayer10 => "BAYER10",
            ImageFormat::Bayer12 => "BAYER12",
            ImageFormat::Bayer14 => "BAYER14",
            ImageFormat::FgBayer8 => "FG_BAYER8",
            ImageFormat::FgBayer10 => "FG_BAYER10",
            ImageFormat::FgBayer12 => "FG_BAYER12",
            ImageFormat::FgBayer14 => "FG_BAYER14",
        };
        f.write_str(name)
    }
}

/// Requested color encoding of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorProfile {
    #[default]
    Unknown,
    Bt601Limited,
    Bt601Full,
    Bt709Limited,
    Bt709Full,
    Bt2020Limited,
    Bt2020Full,
    Jpeg,
    DisplayP3,
}

/// One row of [`FORMAT_TABLE`].
#[derive(Debug, Clone, Copy)]
pub struct FormatEntry {
    pub format: ImageFormat,
    pub order: Option<BayerOrder>,
    pub code: FourCC,
    pub name: &'static str,
}

macro_rules! bayer {
    ($fmt:ident, $order:ident, $code:literal, $name:literal) => {
        FormatEntry {
            format: ImageFormat::$fmt,
            order: Some(BayerOrder::$order),
            code: FourCC::new($code),
            name: $name,
        }
    };
}

/// Image format to V4L2 pixel code mapping.
pub static FORMAT_TABLE: &[FormatEntry] = &[
    FormatEntry {
        format: ImageFormat::Yuy2,
        order: None,
        code: PIX_FMT_YUYV,
        name: "YUYV",
    },
    FormatEntry {
        format: ImageFormat::Nv12,
        order: None,
        code: PIX_FMT_NV12M,
        name: "NV12M",
    },
    FormatEntry {
        format: ImageFormat::Yv12,
        order: None,
        code: PIX_FMT_YVU420,
        name: "YVU420",
    },
    bayer!(Bayer8, Bggr, b"MBB8", "MTISP_SBGGR8"),
    bayer!(Bayer8, Gbrg, b"MBG8", "MTISP_SGBRG8"),
    bayer!(Bayer8, Grbg, b"MBg8", "MTISP_SGRBG8"),
    bayer!(Bayer8, Rggb, b"MBR8", "MTISP_SRGGB8"),
    bayer!(Bayer10, Bggr, b"MBBA", "MTISP_SBGGR10"),
    bayer!(Bayer10, Gbrg, b"MBGA", "MTISP_SGBRG10"),
    bayer!(Bayer10, Grbg, b"MBgA", "MTISP_SGRBG10"),
    bayer!(Bayer10, Rggb, b"MBRA", "MTISP_SRGGB10"),
    bayer!(Bayer12, Bggr, b"MBBC", "MTISP_SBGGR12"),
    bayer!(Bayer12, Gbrg, b"MBGC", "MTISP_SGBRG12"),
    bayer!(Bayer12, Grbg, b"MBgC", "MTISP_SGRBG12"),
    bayer!(Bayer12, Rggb, b"MBRC", "MTISP_SRGGB12"),
    bayer!(Bayer14, Bggr, b"MBBE", "MTISP_SBGGR14"),
    bayer!(Bayer14, Gbrg, b"MBGE", "MTISP_SGBRG14"),
    bayer!(Bayer14, Grbg, b"MBgE", "MTISP_SGRBG14"),
    bayer!(Bayer14, Rggb, b"MBRE", "MTISP_SRGGB14"),
    bayer!(FgBayer8, Bggr, b"MFB8", "MTISP_SBGGR8F"),
    bayer!(FgBayer8, Gbrg, b"MFG8", "MTISP_SGBRG8F"),
    bayer!(FgBayer8, Grbg, b"MFg8", "MTISP_SGRBG8F"),
    bayer!(FgBayer8, Rggb, b"MFR8", "MTISP_SRGGB8F"),
    bayer!(FgBayer10, Bggr, b"MFBA", "MTISP_SBGGR10F"),
    bayer!(FgBayer10, Gbrg, b"MFGA", "MTISP_SGBRG10F"),
    bayer!(FgBayer10, Grbg, b"MFgA", "MTISP_SGRBG10F"),
    bayer!(FgBayer10, Rggb, b"MFRA", "MTISP_SRGGB10F"),
    bayer!(FgBayer12, Bggr, b"MFBC", "MTISP_SBGGR12F"),
    bayer!(FgBayer12, Gbrg, b"MFGC", "MTISP_SGBRG12F"),
    bayer!(FgBayer12, Grbg, b"MFgC", "MTISP_SGRBG12F"),
    bayer!(FgBayer12, Rggb, b"MFRC", "MTISP_SRGGB12F"),
    bayer!(FgBayer14, Bggr, b"MFBE", "MTISP_SBGGR14F"),
    bayer!(FgBayer14, Gbrg, b"MFGE", "MTISP_SGBRG14F"),
    bayer!(FgBayer14, Grbg, b"MFgE", "MTISP_SGRBG14F"),
    bayer!(FgBayer14, Rggb, b"MFRE", "MTISP_SRGGB14F"),
];

/// Color profile to (colorspace, quantization) mapping.
pub static PROFILE_TABLE: &[(ColorProfile, u32, u32)] = &[
    (
        ColorProfile::Unknown,
        V4L2_COLORSPACE_DEFAULT,
        V4L2_QUANTIZATION_FULL_RANGE,
    ),
    (
        ColorProfile::Bt601Limited,
        V4L2_COLORSPACE_DEFAULT,
        V4L2_QUANTIZATION_LIM_RANGE,
    ),
    (
        ColorProfile::Bt601Full,
        V4L2_COLORSPACE_DEFAULT,
        V4L2_QUANTIZATION_FULL_RANGE,
    ),
    (
        ColorProfile::Bt709Limited,
        V4L2_COLORSPACE_REC709,
        V4L2_QUANTIZATION_LIM_RANGE,
    ),
    (
        ColorProfile::Bt709Full,
        V4L2_COLORSPACE_REC709,
        V4L2_QUANTIZATION_FULL_RANGE,
    ),
    (
        ColorProfile::Bt2020Limited,
        V4L2_COLORSPACE_BT2020,
        V4L2_QUANTIZATION_LIM_RANGE,
    ),
    (
        ColorProfile::Bt2020Full,
        V4L2_COLORSPACE_BT2020,
        V4L2_QUANTIZATION_FULL_RANGE,
    ),
    (
        ColorProfile::Jpeg,
        V4L2_COLORSPACE_JPEG,
        V4L2_QUANTIZATION_FULL_RANGE,
    ),
];

/// Looks up the pixel code for a format. Bayer formats need the sensor's
/// bayer order; other formats ignore it.
pub fn pixel_code(format: ImageFormat, order: Option<BayerOrder>) -> Option<&'static FormatEntry> {
    let order = if format.is_bayer() { Some(order?) } else { None };
    FORMAT_TABLE
        .iter()
        .find(|entry| entry.format == format && entry.order == order)
}

/// Looks up `(colorspace, quantization)` for a color profile.
pub fn color_space(profile: ColorProfile) -> Option<(u32, u32)> {
    PROFILE_TABLE
        .iter()
        .find(|(p, _, _)| *p == profile)
        .map(|&(_, colorspace, quantization)| (colorspace, quantization))
}

/// Whether the pixel code carries one memory plane per color plane.
pub fn is_multiplanar(code: FourCC) -> bool {
    code == PIX_FMT_NV12M || code == PIX_FMT_YVU420M
}

/// Image parameters negotiated with a stream node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgParam {
    pub format: ImageFormat,
    pub bayer_order: Option<BayerOrder>,
    pub width: u32,
    pub height: u32,
    /// Row stride of every plane, in bytes.
    pub strides: Vec<u32>,
    /// Total buffer size in bytes; for [`ImageFormat::Blob`] the only
    /// meaningful dimension.
    pub size: u32,
    pub color_profile: ColorProfile,
}

impl ImgParam {
    /// Tightly packed parameters for an image.
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        let size = format.plane_sizes(width, height).iter().sum();
        ImgParam {
            format,
            bayer_order: None,
            width,
            height,
            strides: format.strides(width),
            size,
            color_profile: ColorProfile::default(),
        }
    }

    /// Parameters for a metadata buffer of `size` bytes.
    pub fn blob(size: u32) -> Self {
        ImgParam::new(ImageFormat::Blob, size, 1)
    }

    pub fn with_bayer_order(mut self, order: BayerOrder) -> Self {
        self.bayer_order = Some(order);
        self
    }

    pub fn with_color_profile(mut self, profile: ColorProfile) -> Self {
        self.color_profile = profile;
        self
    }

    pub fn with_strides(mut self, strides: Vec<u32>) -> Self {
        self.strides = strides;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv_codes() {
        assert_eq!(pixel_code(ImageFormat::Yuy2, None).unwrap().code, PIX_FMT_YUYV);
        assert_eq!(pixel_code(ImageFormat::Nv12, None).unwrap().code, PIX_FMT_NV12M);
        assert_eq!(pixel_code(ImageFormat::Yv12, None).unwrap().code, PIX_FMT_YVU420);
        // bayer order is irrelevant for YUV
        assert_eq!(
            pixel_code(ImageFormat::Yuy2, Some(BayerOrder::Rggb)).unwrap().name,
            "YUYV"
        );
        assert!(pixel_code(ImageFormat::Nv21, None).is_none());
        assert!(pixel_code(ImageFormat::Blob, None).is_none());
    }

    #[test]
    fn test_bayer_codes() {
        let entry = pixel_code(ImageFormat::Bayer10, Some(BayerOrder::Grbg)).unwrap();
        assert_eq!(entry.code, FourCC::new(b"MBgA"));
        assert_eq!(entry.name, "MTISP_SGRBG10");

        let entry = pixel_code(ImageFormat::FgBayer14, Some(BayerOrder::Rggb)).unwrap();
        assert_eq!(entry.code, FourCC::new(b"MFRE"));
        assert_eq!(entry.name, "MTISP_SRGGB14F");

        assert!(pixel_code(ImageFormat::Bayer12, None).is_none());
    }

    #[test]
    fn test_table_codes_unique() {
        for (i, a) in FORMAT_TABLE.iter().enumerate() {
            for b in &FORMAT_TABLE[i + 1..] {
                assert_ne!(a.code, b.code, "{} and {} share a code", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_color_space() {
        assert_eq!(
            color_space(ColorProfile::Bt709Limited),
            Some((V4L2_COLORSPACE_REC709, V4L2_QUANTIZATION_LIM_RANGE))
        );
        assert_eq!(
            color_space(ColorProfile::Unknown),
            Some((V4L2_COLORSPACE_DEFAULT, V4L2_QUANTIZATION_FULL_RANGE))
        );
        assert_eq!(
            color_space(ColorProfile::Jpeg),
            Some((V4L2_COLORSPACE_JPEG, V4L2_QUANTIZATION_FULL_RANGE))
        );
        assert_eq!(color_space(ColorProfile::DisplayP3), None);
    }

    #[test]
    fn test_multiplanar() {
        assert!(is_multiplanar(PIX_FMT_NV12M));
        assert!(is_multiplanar(PIX_FMT_YVU420M));
        assert!(!is_multiplanar(PIX_FMT_YVU420));
        assert!(!is_multiplanar(PIX_FMT_YUYV));
    }

    #[test]
    fn test_plane_layout() {
        assert_eq!(ImageFormat::Nv12.plane_sizes(64, 32), vec![2048, 1024]);
        assert_eq!(ImageFormat::Yuy2.strides(640), vec![1280]);
        assert_eq!(ImageFormat::Bayer10.strides(100), vec![125]);
        assert_eq!(ImageFormat::FgBayer10.strides(100), vec![188]);

        let param = ImgParam::new(ImageFormat::Yv12, 64, 32);
        assert_eq!(param.strides, vec![64, 32, 32]);
        assert_eq!(param.size, 2048 + 512 + 512);

        let blob = ImgParam::blob(4096);
        assert_eq!(blob.size, 4096);
        assert_eq!(blob.height, 1);
    }
}
