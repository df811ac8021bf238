// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::str::FromStr;

use crate::v4l2::{EntityKind, MediaLink};

pub const MEDIA_CONTROLLER_P1_TAG: u32 = 0x100;
pub const MEDIA_CONTROLLER_P2_TAG: u32 = 0x200;
pub const MEDIA_CONTROLLER_TAG_MASK: u32 = 0xf00;

/// Media controller configurations the ISP driver exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MediaDeviceTag {
    P1Out1 = MEDIA_CONTROLLER_P1_TAG | 1,
    P1Out2 = MEDIA_CONTROLLER_P1_TAG | 2,
    P2PreviewOut1 = MEDIA_CONTROLLER_P2_TAG | 1,
    P2PreviewOut2 = MEDIA_CONTROLLER_P2_TAG | 2,
    P2CaptureOut1 = MEDIA_CONTROLLER_P2_TAG | 3,
    P2CaptureOut2 = MEDIA_CONTROLLER_P2_TAG | 4,
    P2RecordOut1 = MEDIA_CONTROLLER_P2_TAG | 5,
    P2RecordOut2 = MEDIA_CONTROLLER_P2_TAG | 6,
    P2ReprocessingOut1 = MEDIA_CONTROLLER_P2_TAG | 7,
    P2ReprocessingOut2 = MEDIA_CONTROLLER_P2_TAG | 8,
    P2NewPreviewFd3dnrIn4Out4 = MEDIA_CONTROLLER_P2_TAG | 9,
    P2NewCaptureFd3dnrIn4Out4 = MEDIA_CONTROLLER_P2_TAG | 10,
    P2NewReprocessingFd3dnrIn4Out4 = MEDIA_CONTROLLER_P2_TAG | 11,
}

impl MediaDeviceTag {
    pub const ALL: [MediaDeviceTag; 13] = [
        MediaDeviceTag::P1Out1,
        MediaDeviceTag::P1Out2,
        MediaDeviceTag::P2PreviewOut1,
        MediaDeviceTag::P2PreviewOut2,
        MediaDeviceTag::P2CaptureOut1,
        MediaDeviceTag::P2CaptureOut2,
        MediaDeviceTag::P2RecordOut1,
        MediaDeviceTag::P2RecordOut2,
        MediaDeviceTag::P2ReprocessingOut1,
        MediaDeviceTag::P2ReprocessingOut2,
        MediaDeviceTag::P2NewPreviewFd3dnrIn4Out4,
        MediaDeviceTag::P2NewCaptureFd3dnrIn4Out4,
        MediaDeviceTag::P2NewReprocessingFd3dnrIn4Out4,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_u32() == value)
    }

    pub fn is_p1(self) -> bool {
        self.as_u32() & MEDIA_CONTROLLER_TAG_MASK == MEDIA_CONTROLLER_P1_TAG
    }

    /// Name used on the command line and in logs.
    pub fn name(self) -> &'static str {
        match self {
            MediaDeviceTag::P1Out1 => "p1-out1",
            MediaDeviceTag::P1Out2 => "p1-out2",
            MediaDeviceTag::P2PreviewOut1 => "p2-preview-out1",
            MediaDeviceTag::P2PreviewOut2 => "p2-preview-out2",
            MediaDeviceTag::P2CaptureOut1 => "p2-capture-out1",
            MediaDeviceTag::P2CaptureOut2 => "p2-capture-out2",
            MediaDeviceTag::P2RecordOut1 => "p2-record-out1",
            MediaDeviceTag::P2RecordOut2 => "p2-record-out2",
            MediaDeviceTag::P2ReprocessingOut1 => "p2-reprocessing-out1",
            MediaDeviceTag::P2ReprocessingOut2 => "p2-reprocessing-out2",
            MediaDeviceTag::P2NewPreviewFd3dnrIn4Out4 => "p2-preview-in4out4",
            MediaDeviceTag::P2NewCaptureFd3dnrIn4Out4 => "p2-capture-in4out4",
            MediaDeviceTag::P2NewReprocessingFd3dnrIn4Out4 => "p2-reprocessing-in4out4",
        }
    }
}

impl fmt::Display for MediaDeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MediaDeviceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tag| tag.name() == lower)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|t| t.name()).collect();
                format!("unknown media device '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

const DEFAULT_PAD: u32 = 0;

pub const P1_PAD_META_INPUT: u32 = 0;
pub const P1_PAD_MAIN_STREAM: u32 = 1;
pub const P1_PAD_PACKED_OUT: u32 = 2;
pub const P1_PAD_META0: u32 = 3;

pub const P2_PAD_RAW_INPUT: u32 = 0;
pub const P2_PAD_TUNING: u32 = 1;
pub const P2_PAD_NR_INPUT: u32 = 2;
pub const P2_PAD_SHADING: u32 = 3;
pub const P2_PAD_MDP0: u32 = 4;
pub const P2_PAD_MDP1: u32 = 5;
pub const P2_PAD_IMG2: u32 = 6;
pub const P2_PAD_IMG3: u32 = 7;

pub const P1_MEDIA_NAME: &str = "mtk-cam-p1";
pub const P2_MEDIA_NAME: &str = "mtk-cam-dip";

const P1_HUB: &str = "mtk-cam-p1";
const P1_META_INPUT: &str = "mtk-cam-p1 meta input";
const P1_META: [&str; 4] = [
    "mtk-cam-p1 partial meta 0",
    "mtk-cam-p1 partial meta 1",
    "mtk-cam-p1 partial meta 2",
    "mtk-cam-p1 partial meta 3",
];
const P1_MAIN_STREAM: &str = "mtk-cam-p1 main stream";
const P1_PACKED_OUT: &str = "mtk-cam-p1 packed out";

struct DipNames {
    hub: &'static str,
    raw_input: &'static str,
    tuning: &'static str,
    nr_input: &'static str,
    shading: &'static str,
    mdp0: &'static str,
    mdp1: &'static str,
    img2: &'static str,
    img3: &'static str,
}

static DIP_PREVIEW: DipNames = DipNames {
    hub: "mtk-cam-dip preview",
    raw_input: "mtk-cam-dip preview Raw Input",
    tuning: "mtk-cam-dip preview Tuning",
    nr_input: "mtk-cam-dip preview NR Input",
    shading: "mtk-cam-dip preview Shading",
    mdp0: "mtk-cam-dip preview MDP0",
    mdp1: "mtk-cam-dip preview MDP1",
    img2: "mtk-cam-dip preview IMG2",
    img3: "mtk-cam-dip preview IMG3",
};

static DIP_CAPTURE: DipNames = DipNames {
    hub: "mtk-cam-dip capture",
    raw_input: "mtk-cam-dip capture Raw Input",
    tuning: "mtk-cam-dip capture Tuning",
    nr_input: "mtk-cam-dip capture NR Input",
    shading: "mtk-cam-dip capture Shading",
    mdp0: "mtk-cam-dip capture MDP0",
    mdp1: "mtk-cam-dip capture MDP1",
    img2: "mtk-cam-dip capture IMG2",
    img3: "mtk-cam-dip capture IMG3",
};

static DIP_REPROCESS: DipNames = DipNames {
    hub: "mtk-cam-dip reprocess",
    raw_input: "mtk-cam-dip reprocess Raw Input",
    tuning: "mtk-cam-dip reprocess Tuning",
    nr_input: "mtk-cam-dip reprocess NR Input",
    shading: "mtk-cam-dip reprocess Shading",
    mdp0: "mtk-cam-dip reprocess MDP0",
    mdp1: "mtk-cam-dip reprocess MDP1",
    img2: "mtk-cam-dip reprocess IMG2",
    img3: "mtk-cam-dip reprocess IMG3",
};

enum Layout {
    P1 { packed_out: bool },
    P2 { dip: &'static DipNames, mdp1: bool },
    P2New(&'static DipNames),
}

static TOPOLOGY_TABLE: &[(MediaDeviceTag, Layout)] = &[
    (MediaDeviceTag::P1Out1, Layout::P1 { packed_out: false }),
    (MediaDeviceTag::P1Out2, Layout::P1 { packed_out: true }),
    (
        MediaDeviceTag::P2PreviewOut1,
        Layout::P2 {
            dip: &DIP_PREVIEW,
            mdp1: false,
        },
    ),
    (
        MediaDeviceTag::P2PreviewOut2,
        Layout::P2 {
            dip: &DIP_PREVIEW,
            mdp1: true,
        },
    ),
    (
        MediaDeviceTag::P2CaptureOut1,
        Layout::P2 {
            dip: &DIP_CAPTURE,
            mdp1: false,
        },
    ),
    (
        MediaDeviceTag::P2CaptureOut2,
        Layout::P2 {
            dip: &DIP_CAPTURE,
            mdp1: true,
        },
    ),
    (
        MediaDeviceTag::P2RecordOut1,
        Layout::P2 {
            dip: &DIP_PREVIEW,
            mdp1: false,
        },
    ),
    (
        MediaDeviceTag::P2RecordOut2,
        Layout::P2 {
            dip: &DIP_PREVIEW,
            mdp1: true,
        },
    ),
    (
        MediaDeviceTag::P2ReprocessingOut1,
        Layout::P2 {
            dip: &DIP_REPROCESS,
            mdp1: false,
        },
    ),
    (
        MediaDeviceTag::P2ReprocessingOut2,
        Layout::P2 {
            dip: &DIP_REPROCESS,
            mdp1: true,
        },
    ),
    (
        MediaDeviceTag::P2NewPreviewFd3dnrIn4Out4,
        Layout::P2New(&DIP_PREVIEW),
    ),
    (
        MediaDeviceTag::P2NewCaptureFd3dnrIn4Out4,
        Layout::P2New(&DIP_CAPTURE),
    ),
    (
        MediaDeviceTag::P2NewReprocessingFd3dnrIn4Out4,
        Layout::P2New(&DIP_REPROCESS),
    ),
];

/// Entities and enabled links of one media device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub tag: MediaDeviceTag,
    pub tuning: bool,
    /// Model name of the media device.
    pub media_name: &'static str,
    pub entities: Vec<(&'static str, EntityKind)>,
    pub links: Vec<MediaLink<'static>>,
}

impl Topology {
    /// Builds the topology of `tag`, with the tuning path when `tuning` is
    /// set.
    pub fn new(tag: MediaDeviceTag, tuning: bool) -> Topology {
        let mut topo = Topology {
            tag,
            tuning,
            media_name: if tag.is_p1() {
                P1_MEDIA_NAME
            } else {
                P2_MEDIA_NAME
            },
            entities: Vec::new(),
            links: Vec::new(),
        };
        // Every tag has exactly one table row.
        let layout = TOPOLOGY_TABLE
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, layout)| layout);
        match layout {
            Some(Layout::P1 { packed_out }) => topo.build_p1(*packed_out),
            Some(Layout::P2 { dip, mdp1 }) => topo.build_p2(dip, *mdp1),
            Some(Layout::P2New(dip)) => topo.build_p2_new(dip),
            None => {}
        }
        topo
    }

    fn hub(&mut self, name: &'static str) {
        self.entities.push((name, EntityKind::SubDevice));
    }

    fn video(&mut self, name: &'static str) {
        self.entities.push((name, EntityKind::Video));
    }

    fn link(&mut self, source: &'static str, source_pad: u32, sink: &'static str, sink_pad: u32) {
        self.links
            .push(MediaLink::new(source, source_pad, sink, sink_pad));
    }

    fn build_p1(&mut self, packed_out: bool) {
        self.hub(P1_HUB);
        if self.tuning {
            self.video(P1_META_INPUT);
            self.link(P1_META_INPUT, DEFAULT_PAD, P1_HUB, P1_PAD_META_INPUT);
            for (i, meta) in P1_META.into_iter().enumerate() {
                self.video(meta);
                self.link(P1_HUB, P1_PAD_META0 + i as u32, meta, DEFAULT_PAD);
            }
        }
        self.video(P1_MAIN_STREAM);
        self.link(P1_HUB, P1_PAD_MAIN_STREAM, P1_MAIN_STREAM, DEFAULT_PAD);
        if packed_out {
            self.video(P1_PACKED_OUT);
            self.link(P1_HUB, P1_PAD_PACKED_OUT, P1_PACKED_OUT, DEFAULT_PAD);
        }
    }

    fn build_p2(&mut self, dip: &'static DipNames, mdp1: bool) {
        self.hub(dip.hub);
        self.video(dip.raw_input);
        self.video(dip.mdp0);
        self.link(dip.raw_input, DEFAULT_PAD, dip.hub, P2_PAD_RAW_INPUT);
        self.link(dip.hub, P2_PAD_MDP0, dip.mdp0, DEFAULT_PAD);
        if mdp1 {
            self.video(dip.mdp1);
            self.link(dip.hub, P2_PAD_MDP1, dip.mdp1, DEFAULT_PAD);
        }
        self.tuning_input(dip);
    }

    fn build_p2_new(&mut self, dip: &'static DipNames) {
        self.hub(dip.hub);
        for name in [
            dip.raw_input,
            dip.nr_input,
            dip.shading,
            dip.mdp0,
            dip.mdp1,
            dip.img2,
            dip.img3,
        ] {
            self.video(name);
        }
        self.link(dip.raw_input, DEFAULT_PAD, dip.hub, P2_PAD_RAW_INPUT);
        self.link(dip.nr_input, DEFAULT_PAD, dip.hub, P2_PAD_NR_INPUT);
        self.link(dip.shading, DEFAULT_PAD, dip.hub, P2_PAD_SHADING);
        self.link(dip.hub, P2_PAD_MDP0, dip.mdp0, DEFAULT_PAD);
        self.link(dip.hub, P2_PAD_MDP1, dip.mdp1, DEFAULT_PAD);
        self.link(dip.hub, P2_PAD_IMG2, dip.img2, DEFAULT_PAD);
        self.link(dip.hub, P2_PAD_IMG3, dip.img3, DEFAULT_PAD);
        self.tuning_input(dip);
    }

    fn tuning_input(&mut self, dip: &'static DipNames) {
        if self.tuning {
            self.video(dip.tuning);
            self.link(dip.tuning, DEFAULT_PAD, dip.hub, P2_PAD_TUNING);
        }
    }

    pub fn video_nodes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entities
            .iter()
            .filter(|(_, kind)| *kind == EntityKind::Video)
            .map(|(name, _)| *name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_values() {
        assert_eq!(MediaDeviceTag::P1Out2.as_u32(), 0x102);
        assert_eq!(MediaDeviceTag::P2ReprocessingOut2.as_u32(), 0x208);
        assert_eq!(MediaDeviceTag::from_u32(0x20b), Some(MediaDeviceTag::P2NewReprocessingFd3dnrIn4Out4));
        assert_eq!(MediaDeviceTag::from_u32(0x300), None);
        assert!(MediaDeviceTag::P1Out1.is_p1());
        assert!(!MediaDeviceTag::P2PreviewOut1.is_p1());
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!("P1-OUT2".parse::<MediaDeviceTag>(), Ok(MediaDeviceTag::P1Out2));
        for tag in MediaDeviceTag::ALL {
            assert_eq!(tag.name().parse::<MediaDeviceTag>(), Ok(tag));
        }
        assert!("p3".parse::<MediaDeviceTag>().is_err());
    }

    #[test]
    fn test_every_tag_has_layout() {
        for tag in MediaDeviceTag::ALL {
            let topo = Topology::new(tag, false);
            assert!(!topo.entities.is_empty(), "{} has no entities", tag);
            assert_eq!(topo.entities[0].1, EntityKind::SubDevice);
        }
    }

    #[test]
    fn test_p1_out2_tuning() {
        let topo = Topology::new(MediaDeviceTag::P1Out2, true);
        assert_eq!(topo.media_name, "mtk-cam-p1");
        let nodes: Vec<_> = topo.video_nodes().collect();
        assert_eq!(
            nodes,
            vec![
                "mtk-cam-p1 meta input",
                "mtk-cam-p1 partial meta 0",
                "mtk-cam-p1 partial meta 1",
                "mtk-cam-p1 partial meta 2",
                "mtk-cam-p1 partial meta 3",
                "mtk-cam-p1 main stream",
                "mtk-cam-p1 packed out",
            ]
        );
        assert_eq!(topo.links.len(), 7);
        assert!(topo
            .links
            .contains(&MediaLink::new("mtk-cam-p1", 6, "mtk-cam-p1 partial meta 3", 0)));
        assert!(topo
            .links
            .contains(&MediaLink::new("mtk-cam-p1 meta input", 0, "mtk-cam-p1", 0)));
    }

    #[test]
    fn test_p1_out1_plain() {
        let topo = Topology::new(MediaDeviceTag::P1Out1, false);
        let nodes: Vec<_> = topo.video_nodes().collect();
        assert_eq!(nodes, vec!["mtk-cam-p1 main stream"]);
        assert_eq!(
            topo.links,
            vec![MediaLink::new("mtk-cam-p1", 1, "mtk-cam-p1 main stream", 0)]
        );
    }

    #[test]
    fn test_record_uses_preview_names() {
        let topo = Topology::new(MediaDeviceTag::P2RecordOut2, true);
        assert_eq!(topo.media_name, "mtk-cam-dip");
        assert_eq!(topo.entities[0].0, "mtk-cam-dip preview");
        assert!(topo
            .links
            .contains(&MediaLink::new("mtk-cam-dip preview", 5, "mtk-cam-dip preview MDP1", 0)));
        assert!(topo
            .links
            .contains(&MediaLink::new("mtk-cam-dip preview Tuning", 0, "mtk-cam-dip preview", 1)));
    }

    #[test]
    fn test_p2_new_pads() {
        let topo = Topology::new(MediaDeviceTag::P2NewCaptureFd3dnrIn4Out4, false);
        assert_eq!(topo.video_nodes().count(), 7);
        assert!(topo
            .links
            .contains(&MediaLink::new("mtk-cam-dip capture Shading", 0, "mtk-cam-dip capture", 3)));
        assert!(topo
            .links
            .contains(&MediaLink::new("mtk-cam-dip capture", 7, "mtk-cam-dip capture IMG3", 0)));
    }
}
