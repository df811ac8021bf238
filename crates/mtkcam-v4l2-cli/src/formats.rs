// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Prints the pixel-code and color-profile tables.

use crate::error::CliError;
use clap::Args as ClapArgs;
use mtkcam_v4l2::format::{FORMAT_TABLE, PROFILE_TABLE};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Show only formats whose name contains this text
    #[arg(short, long)]
    filter: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatsOutput {
    formats: Vec<FormatInfo>,
    profiles: Vec<ProfileInfo>,
}

#[derive(Debug, Serialize)]
struct FormatInfo {
    format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<String>,
    fourcc: String,
    name: &'static str,
    multiplanar: bool,
}

#[derive(Debug, Serialize)]
struct ProfileInfo {
    profile: String,
    colorspace: u32,
    quantization: u32,
}

fn collect(filter: Option<&str>) -> FormatsOutput {
    let filter = filter.map(str::to_lowercase);
    let formats = FORMAT_TABLE
        .iter()
        .filter(|entry| {
            filter.as_deref().map_or(true, |f| {
                entry.format.to_string().to_lowercase().contains(f)
                    || entry.name.to_lowercase().contains(f)
            })
        })
        .map(|entry| FormatInfo {
            format: entry.format.to_string(),
            order: entry.order.map(|o| format!("{:?}", o).to_uppercase()),
            fourcc: entry.code.to_string(),
            name: entry.name,
            multiplanar: mtkcam_v4l2::format::is_multiplanar(entry.code),
        })
        .collect();
    let profiles = PROFILE_TABLE
        .iter()
        .map(|&(profile, colorspace, quantization)| ProfileInfo {
            profile: format!("{:?}", profile),
            colorspace,
            quantization,
        })
        .collect();
    FormatsOutput { formats, profiles }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing formats command: {:?}", args);
    let output = collect(args.filter.as_deref());

    if json {
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Pixel formats:");
    for info in &output.formats {
        println!(
            "  {:<11} {:<5} {}  {}{}",
            info.format,
            info.order.as_deref().unwrap_or("-"),
            info.fourcc,
            info.name,
            if info.multiplanar { " (mplane)" } else { "" }
        );
    }
    println!("\nColor profiles:");
    for info in &output.profiles {
        println!(
            "  {:<14} colorspace {:<2} quantization {}",
            info.profile, info.colorspace, info.quantization
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_filter() {
        let all = collect(None);
        assert_eq!(all.formats.len(), FORMAT_TABLE.len());
        assert_eq!(all.profiles.len(), 8);

        let yuv = collect(Some("yuy"));
        assert_eq!(yuv.formats.len(), 1);
        assert_eq!(yuv.formats[0].fourcc, "YUYV");

        let bayer10 = collect(Some("MTISP_SRGGB10"));
        assert!(bayer10
            .formats
            .iter()
            .all(|f| f.order.as_deref() == Some("RGGB")));
    }
}
