// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Harness-visible output.
//!
//! Everything the interoperability harness greps for goes through
//! [`ShapeOutput`]; diagnostics go through `tracing` instead.

use std::io::{self, Write};

use crate::sample::ShapeSample;

/// Format a sample line: `%-10s %-10s %03d %03d [%d]`.
pub fn format_sample(topic: &str, sample: &ShapeSample) -> String {
    format!(
        "{:<10} {:<10} {:03} {:03} [{}]",
        topic, sample.color, sample.x, sample.y, sample.shapesize
    )
}

/// Sink for protocol lines and samples.
pub trait ShapeOutput {
    fn line(&mut self, line: &str);

    fn sample(&mut self, topic: &str, sample: &ShapeSample) {
        self.line(&format_sample(topic, sample));
    }
}

/// Writes to the process stdout.
#[derive(Debug, Default)]
pub struct StdoutOutput;

impl ShapeOutput for StdoutOutput {
    fn line(&mut self, line: &str) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        // A closed pipe only means nobody is listening any more.
        let _ = writeln!(lock, "{}", line);
        let _ = lock.flush();
    }
}

/// Collects output in memory.
#[derive(Debug, Default, Clone)]
pub struct VecOutput {
    pub lines: Vec<String>,
    pub samples: Vec<(String, ShapeSample)>,
}

impl ShapeOutput for VecOutput {
    fn line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn sample(&mut self, topic: &str, sample: &ShapeSample) {
        self.samples.push((topic.to_string(), sample.clone()));
        self.line(&format_sample(topic, sample));
    }
}

impl VecOutput {
    pub fn colors(&self) -> Vec<&str> {
        self.samples.iter().map(|(_, s)| s.color.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_line_format() {
        let sample = ShapeSample::new("RED", 5, 42, 20);
        assert_eq!(
            format_sample("Square", &sample),
            "Square     RED        005 042 [20]"
        );
    }

    #[test]
    fn test_vec_output_records_both_views() {
        let mut out = VecOutput::default();
        out.line("Create topic: Square");
        out.sample("Square", &ShapeSample::new("BLUE", 100, 200, 20));

        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.colors(), vec!["BLUE"]);
        assert_eq!(out.lines[1], "Square     BLUE       100 200 [20]");
    }
}
