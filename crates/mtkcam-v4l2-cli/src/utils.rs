// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use mtkcam_v4l2::format::{BayerOrder, ImageFormat};
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const FORMATS: &[ImageFormat] = &[
    ImageFormat::Yuy2,
    ImageFormat::Nv12,
    ImageFormat::Nv21,
    ImageFormat::Yv12,
    ImageFormat::Blob,
    ImageFormat::Bayer8,
    ImageFormat::Bayer10,
    ImageFormat::Bayer12,
    ImageFormat::Bayer14,
    ImageFormat::FgBayer8,
    ImageFormat::FgBayer10,
    ImageFormat::FgBayer12,
    ImageFormat::FgBayer14,
];

/// Parses `WxH` (or `W*H`) into a non-zero width and height.
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let invalid = || CliError::InvalidArgs(format!("resolution {:?} is not WxH", s));
    let (w, h) = s
        .split_once(|c: char| c == 'x' || c == '*')
        .ok_or_else(invalid)?;
    let dim = |v: &str| v.parse::<u32>().ok().filter(|&n| n > 0).ok_or_else(invalid);
    Ok((dim(w)?, dim(h)?))
}

/// Parse an image format name with an optional bayer order, such as
/// `yuy2`, `nv12` or `bayer10:rggb`.
pub fn parse_format(s: &str) -> Result<(ImageFormat, Option<BayerOrder>), CliError> {
    let (name, order) = match s.split_once(':') {
        Some((name, order)) => (name, Some(parse_bayer_order(order)?)),
        None => (s, None),
    };

    let format = FORMATS
        .iter()
        .copied()
        .find(|f| f.to_string().eq_ignore_ascii_case(name))
        .ok_or_else(|| CliError::InvalidArgs(format!("Unknown image format: {}", name)))?;

    if format.is_bayer() && order.is_none() {
        return Err(CliError::InvalidArgs(format!(
            "Bayer format {} needs an order, e.g. {}:rggb",
            format,
            name.to_lowercase()
        )));
    }

    Ok((format, order))
}

fn parse_bayer_order(s: &str) -> Result<BayerOrder, CliError> {
    match s.to_ascii_lowercase().as_str() {
        "bggr" => Ok(BayerOrder::Bggr),
        "gbrg" => Ok(BayerOrder::Gbrg),
        "grbg" => Ok(BayerOrder::Grbg),
        "rggb" => Ok(BayerOrder::Rggb),
        _ => Err(CliError::InvalidArgs(format!("Unknown bayer order: {}", s))),
    }
}

/// Returns a flag raised by SIGINT, polled between frame cycles.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("cannot watch SIGINT: {}", e)))?;
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("4208x3120").unwrap(), (4208, 3120));
        assert_eq!(parse_resolution("320*240").unwrap(), (320, 240));

        for bad in ["640", "640x", "*480", "640x480x2", "0x480", "640x-1", "axb"] {
            assert!(parse_resolution(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("yuy2").unwrap(), (ImageFormat::Yuy2, None));
        assert_eq!(parse_format("NV12").unwrap(), (ImageFormat::Nv12, None));
        assert_eq!(
            parse_format("bayer10:RGGB").unwrap(),
            (ImageFormat::Bayer10, Some(BayerOrder::Rggb))
        );
        assert_eq!(
            parse_format("fg_bayer12:bggr").unwrap(),
            (ImageFormat::FgBayer12, Some(BayerOrder::Bggr))
        );
    }

    #[test]
    fn test_parse_format_invalid() {
        assert!(parse_format("mjpg").is_err());
        assert!(parse_format("bayer10").is_err());
        assert!(parse_format("bayer10:rgbg").is_err());
    }
}
