// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Prints the entities and links of a media-device configuration.

use crate::error::CliError;
use clap::Args as ClapArgs;
use mtkcam_v4l2::topology::{MediaDeviceTag, Topology};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Media-device tag, e.g. p1-out2 or p2-preview-out1 (all when omitted)
    tag: Option<MediaDeviceTag>,

    /// Include the tuning and metadata path
    #[arg(short, long)]
    tuning: bool,
}

#[derive(Debug, Serialize)]
struct TopologyOutput {
    tag: String,
    value: u32,
    media: &'static str,
    tuning: bool,
    entities: Vec<EntityInfo>,
    links: Vec<LinkInfo>,
}

#[derive(Debug, Serialize)]
struct EntityInfo {
    name: &'static str,
    kind: String,
}

#[derive(Debug, Serialize)]
struct LinkInfo {
    source: &'static str,
    source_pad: u32,
    sink: &'static str,
    sink_pad: u32,
}

fn describe(tag: MediaDeviceTag, tuning: bool) -> TopologyOutput {
    let topo = Topology::new(tag, tuning);
    TopologyOutput {
        tag: tag.to_string(),
        value: tag.as_u32(),
        media: topo.media_name,
        tuning,
        entities: topo
            .entities
            .iter()
            .map(|&(name, kind)| EntityInfo {
                name,
                kind: kind.to_string(),
            })
            .collect(),
        links: topo
            .links
            .iter()
            .map(|link| LinkInfo {
                source: link.source,
                source_pad: link.source_pad,
                sink: link.sink,
                sink_pad: link.sink_pad,
            })
            .collect(),
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing topology command: {:?}", args);

    let tags: Vec<MediaDeviceTag> = match args.tag {
        Some(tag) => vec![tag],
        None => MediaDeviceTag::ALL.to_vec(),
    };
    let output: Vec<TopologyOutput> = tags
        .into_iter()
        .map(|tag| describe(tag, args.tuning))
        .collect();

    if json {
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    for topo in &output {
        println!(
            "{} ({:#05x}) on {}{}",
            topo.tag,
            topo.value,
            topo.media,
            if topo.tuning { " with tuning" } else { "" }
        );
        println!("  Entities:");
        for entity in &topo.entities {
            println!("    {:<7} {}", entity.kind, entity.name);
        }
        println!("  Links:");
        for link in &topo.links {
            println!(
                "    \"{}\":{} -> \"{}\":{}",
                link.source, link.source_pad, link.sink, link.sink_pad
            );
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_p1() {
        let out = describe(MediaDeviceTag::P1Out2, false);
        assert_eq!(out.tag, "p1-out2");
        assert_eq!(out.value, 0x102);
        assert_eq!(out.media, "mtk-cam-p1");
        assert_eq!(out.entities[0].name, "mtk-cam-p1");
        assert_eq!(out.entities[0].kind, "subdev");
        assert_eq!(out.links.len(), 2);
    }
}
