// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Cycle accounting for the simulate and capture commands.

use serde::Serialize;
use std::time::Instant;

/// Summary of a run of frame cycles
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycles: u64,
    pub queued_requests: u64,
    /// Cycles lost according to the lead node's sequence numbers
    pub dropped_frames: u64,
    pub duration_ms: u64,
    pub cycles_per_sec: f64,
    pub bytes_dequeued: u64,
    /// Enqueue-to-dequeue time of a whole cycle
    pub latency_us: LatencySummary,
    pub nodes: Vec<NodeReport>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencySummary {
    pub min: u64,
    pub max: u64,
    pub mean: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl LatencySummary {
    /// `sorted` must be in ascending order.
    fn from_sorted(sorted: &[u64]) -> Self {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Self::default();
        };
        let rank = |p: usize| sorted[(sorted.len() - 1) * p / 100];
        Self {
            min,
            max,
            mean: sorted.iter().sum::<u64>() / sorted.len() as u64,
            p50: rank(50),
            p95: rank(95),
            p99: rank(99),
        }
    }
}

/// Buffers dequeued from one stream node
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub buffers: u64,
    pub bytes: u64,
}

pub struct MetricsCollector {
    started: Instant,
    latencies_us: Vec<u64>,
    nodes: Vec<NodeReport>,
    last_sequence: Option<u32>,
    dropped: u64,
    queued_requests: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            latencies_us: Vec::new(),
            nodes: Vec::new(),
            last_sequence: None,
            dropped: 0,
            queued_requests: 0,
        }
    }

    /// Close one cycle that took `latency_us`.
    pub fn record_latency_us(&mut self, latency_us: u64) {
        self.latencies_us.push(latency_us);
    }

    /// Account one dequeued buffer of `size` bytes on `node`.
    pub fn record_buffer(&mut self, node: &str, size: u64) {
        match self.nodes.iter_mut().find(|n| n.node == node) {
            Some(entry) => {
                entry.buffers += 1;
                entry.bytes += size;
            }
            None => self.nodes.push(NodeReport {
                node: node.to_owned(),
                buffers: 1,
                bytes: size,
            }),
        }
    }

    pub fn record_queued_requests(&mut self, count: u64) {
        self.queued_requests = count;
    }

    /// Feeds the lead node's kernel sequence number and returns how many
    /// frames were skipped since the previous one. A restarted stream
    /// (sequence going backwards) is not a drop.
    pub fn track_sequence(&mut self, sequence: u32) -> u64 {
        let skipped = match self.last_sequence {
            Some(last) if sequence < last => {
                log::warn!("sequence went back from {} to {}", last, sequence);
                0
            }
            Some(last) => u64::from(sequence.saturating_sub(last).saturating_sub(1)),
            None => 0,
        };
        self.dropped += skipped;
        self.last_sequence = Some(sequence);
        skipped
    }

    pub fn finalize(&mut self) -> CycleReport {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        let cycles = self.latencies_us.len() as u64;

        self.latencies_us.sort_unstable();
        CycleReport {
            cycles,
            queued_requests: self.queued_requests,
            dropped_frames: self.dropped,
            duration_ms: elapsed.as_millis() as u64,
            cycles_per_sec: if secs > 0.0 { cycles as f64 / secs } else { 0.0 },
            bytes_dequeued: self.nodes.iter().map(|n| n.bytes).sum(),
            latency_us: LatencySummary::from_sorted(&self.latencies_us),
            nodes: self.nodes.clone(),
        }
    }

    pub fn print_text(&mut self) {
        let report = self.finalize();
        println!("\n=== Request Cycles ===");
        println!("Cycles:            {}", report.cycles);
        println!("Queued requests:   {}", report.queued_requests);
        println!("Dropped frames:    {}", report.dropped_frames);
        println!(
            "Duration:          {:.2} s ({:.1} cycles/s)",
            report.duration_ms as f64 / 1000.0,
            report.cycles_per_sec
        );

        if report.cycles > 0 {
            let l = report.latency_us;
            println!(
                "Latency (us):      min {} / mean {} / p95 {} / p99 {} / max {}",
                l.min, l.mean, l.p95, l.p99, l.max
            );
        }

        if !report.nodes.is_empty() {
            println!("\nNodes:");
            for node in &report.nodes {
                println!(
                    "  {:<32} {:>6} buffers {:>12} bytes",
                    node.node, node.buffers, node.bytes
                );
            }
        }
    }

    pub fn print_json(&mut self) -> Result<(), serde_json::Error> {
        let report = self.finalize();
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_summary() {
        let mut collector = MetricsCollector::new();
        for i in 0..=10 {
            collector.record_latency_us(100 - i * 10);
        }

        let l = collector.finalize().latency_us;
        assert_eq!((l.min, l.max, l.mean), (0, 100, 50));
        assert_eq!(l.p50, 50);
        assert_eq!(l.p95, 90);
        assert_eq!(l.p99, 90);
    }

    #[test]
    fn test_sequence_drops() {
        let mut collector = MetricsCollector::new();
        assert_eq!(collector.track_sequence(4), 0);
        assert_eq!(collector.track_sequence(5), 0);
        assert_eq!(collector.track_sequence(9), 3);
        assert_eq!(collector.track_sequence(0), 0);
        assert_eq!(collector.track_sequence(1), 0);
        assert_eq!(collector.finalize().dropped_frames, 3);
    }

    #[test]
    fn test_per_node_bytes() {
        let mut collector = MetricsCollector::new();
        for _ in 0..3 {
            collector.record_buffer("mtk-cam-p1 main stream", 4096);
            collector.record_buffer("mtk-cam-p1 packed out", 1024);
            collector.record_latency_us(500);
        }
        collector.record_queued_requests(3);

        let report = collector.finalize();
        assert_eq!(report.cycles, 3);
        assert_eq!(report.queued_requests, 3);
        assert_eq!(report.bytes_dequeued, 3 * (4096 + 1024));
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.nodes[1].node, "mtk-cam-p1 packed out");
        assert_eq!(report.nodes[1].buffers, 3);
    }

    #[test]
    fn test_empty_report() {
        let report = MetricsCollector::default().finalize();
        assert_eq!(report.cycles, 0);
        assert_eq!(report.bytes_dequeued, 0);
        assert_eq!(report.latency_us.max, 0);
        assert!(report.nodes.is_empty());
    }
}
