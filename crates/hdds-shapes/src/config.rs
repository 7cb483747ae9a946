// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Environment variable configuration.
//!
//! Settings the CLI does not expose:
//!
//! - `HDDS_SHAPES_CANVAS`: canvas size as `<width>x<height>` (default: `240x270`)
//! - `HDDS_SHAPES_SHAPESIZE`: published shape size (default: 20)
//! - `HDDS_SHAPES_PUBLISH_PERIOD_MS`: publisher tick (default: 33)
//! - `HDDS_SHAPES_POLL_PERIOD_MS`: subscriber poll interval (default: 100)
//! - `HDDS_LOG_LEVEL`: log level when `-v` is not given (default: "warn")
//!
//! Malformed values are reported and replaced by the default.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::motion::Canvas;
use crate::options::DEFAULT_SHAPE_SIZE;

pub const ENV_CANVAS: &str = "HDDS_SHAPES_CANVAS";
pub const ENV_SHAPE_SIZE: &str = "HDDS_SHAPES_SHAPESIZE";
pub const ENV_PUBLISH_PERIOD_MS: &str = "HDDS_SHAPES_PUBLISH_PERIOD_MS";
pub const ENV_POLL_PERIOD_MS: &str = "HDDS_SHAPES_POLL_PERIOD_MS";
pub const ENV_LOG_LEVEL: &str = "HDDS_LOG_LEVEL";

/// Publisher tick.
pub const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_millis(33);
/// Subscriber poll interval.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Runtime configuration from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub canvas: Canvas,
    pub shape_size: i32,
    pub publish_period: Duration,
    pub poll_period: Duration,
    pub log_level: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            shape_size: DEFAULT_SHAPE_SIZE,
            publish_period: DEFAULT_PUBLISH_PERIOD,
            poll_period: DEFAULT_POLL_PERIOD,
            log_level: "warn".to_string(),
        }
    }
}

impl EnvConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let canvas = get(ENV_CANVAS)
            .and_then(|raw| {
                let parsed = parse_canvas(&raw);
                if parsed.is_none() {
                    warn!("ignoring {}={:?}: expected <width>x<height>", ENV_CANVAS, raw);
                }
                parsed
            })
            .unwrap_or(defaults.canvas);

        let shape_size = get(ENV_SHAPE_SIZE)
            .and_then(|raw| parse_positive(ENV_SHAPE_SIZE, &raw))
            .and_then(|v| match i32::try_from(v) {
                Ok(size) => Some(size),
                Err(_) => {
                    warn!("ignoring {}={}: larger than {}", ENV_SHAPE_SIZE, v, i32::MAX);
                    None
                }
            })
            .unwrap_or(defaults.shape_size);

        let publish_period = get(ENV_PUBLISH_PERIOD_MS)
            .and_then(|raw| parse_positive(ENV_PUBLISH_PERIOD_MS, &raw))
            .map(|ms| Duration::from_millis(u64::from(ms)))
            .unwrap_or(defaults.publish_period);

        let poll_period = get(ENV_POLL_PERIOD_MS)
            .and_then(|raw| parse_positive(ENV_POLL_PERIOD_MS, &raw))
            .map(|ms| Duration::from_millis(u64::from(ms)))
            .unwrap_or(defaults.poll_period);

        let log_level = get(ENV_LOG_LEVEL).unwrap_or(defaults.log_level);

        Self {
            canvas,
            shape_size,
            publish_period,
            poll_period,
            log_level,
        }
    }
}

fn parse_canvas(raw: &str) -> Option<Canvas> {
    let (w, h) = raw.split_once(|c: char| c == 'x' || c == 'X')?;
    let width = w.trim().parse::<i32>().ok().filter(|v| *v > 0)?;
    let height = h.trim().parse::<i32>().ok().filter(|v| *v > 0)?;
    Some(Canvas::new(width, height))
}

fn parse_positive(key: &str, raw: &str) -> Option<u32> {
    match raw.parse::<u32>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            warn!("ignoring {}={:?}: expected a positive integer", key, raw);
            None
        }
    }
}
