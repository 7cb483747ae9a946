// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher-side motion loop.
//!
//! A shape bounces inside the canvas: each tick moves it by its velocity,
//! and an axis that leaves `[w2, extent - w2]` (with `w2 = 1 + size / 2`) is
//! clamped back and its velocity negated. Randomness is only used once, to
//! place the shape and pick a velocity.

use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::options::{ShapeOptions, DEFAULT_COLOR};
use crate::output::ShapeOutput;
use crate::sample::ShapeSample;
use crate::transport::Transport;

/// Drawing area the shape bounces in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: i32,
    pub height: i32,
}

impl Canvas {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(240, 270)
    }
}

/// Position, velocity and appearance of the published shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeState {
    pub color: String,
    pub x: i32,
    pub y: i32,
    pub xvel: i32,
    pub yvel: i32,
    pub size: i32,
}

impl ShapeState {
    /// Half extent used for wall collisions.
    pub fn half_extent(&self) -> i32 {
        1 + self.size / 2
    }

    pub fn to_sample(&self) -> ShapeSample {
        ShapeSample::new(self.color.clone(), self.x, self.y, self.size)
    }
}

/// Counters of a publishing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub ticks: u64,
    pub written: u64,
    pub write_errors: u64,
}

/// Advances one shape and writes it every tick.
#[derive(Debug, Clone)]
pub struct MotionSimulator {
    state: ShapeState,
    canvas: Canvas,
}

/// Generator seeded once from the wall clock.
pub fn wall_clock_rng() -> fastrand::Rng {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    fastrand::Rng::with_seed(seed)
}

impl MotionSimulator {
    pub fn new(state: ShapeState, canvas: Canvas) -> Self {
        Self { state, canvas }
    }

    /// Random start position inside the canvas; velocity from the options
    /// or drawn from `1..=5` with a random sign per axis.
    pub fn from_options(options: &ShapeOptions, rng: &mut fastrand::Rng) -> Self {
        let canvas = options.canvas;
        let (xvel, yvel) = options
            .velocity
            .unwrap_or_else(|| (random_velocity(rng), random_velocity(rng)));

        let state = ShapeState {
            color: options
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            x: rng.i32(0..canvas.width.max(1)),
            y: rng.i32(0..canvas.height.max(1)),
            xvel,
            yvel,
            size: options.shape_size,
        };
        debug!("initial shape state: {:?} on {:?}", state, canvas);
        Self::new(state, canvas)
    }

    pub fn state(&self) -> &ShapeState {
        &self.state
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    /// Move by one tick and bounce off the walls.
    pub fn step(&mut self) -> &ShapeState {
        let w2 = self.state.half_extent();
        let s = &mut self.state;

        s.x += s.xvel;
        s.y += s.yvel;
        bounce(&mut s.x, &mut s.xvel, w2, self.canvas.width - w2);
        bounce(&mut s.y, &mut s.yvel, w2, self.canvas.height - w2);
        &self.state
    }

    /// One tick: move, write, and print the sample once it is written.
    pub fn tick<T: Transport>(
        &mut self,
        transport: &T,
        writer: &T::Writer,
        topic: &str,
        out: &mut dyn ShapeOutput,
        print: bool,
        stats: &mut PublishStats,
    ) {
        let sample = self.step().to_sample();
        stats.ticks += 1;
        match transport.write(writer, &sample) {
            Ok(()) => {
                stats.written += 1;
                if print {
                    out.sample(topic, &sample);
                }
            }
            Err(e) => {
                stats.write_errors += 1;
                warn!("write failed on '{}': {}", topic, e);
            }
        }
    }

    /// Tick every publish period until shutdown is requested.
    pub fn run<T: Transport>(
        &mut self,
        transport: &T,
        writer: &T::Writer,
        topic: &str,
        ctx: &RunContext,
        out: &mut dyn ShapeOutput,
        print: bool,
    ) -> PublishStats {
        let mut stats = PublishStats::default();
        info!(
            "publishing {} on '{}' every {:?}",
            self.state.color,
            topic,
            ctx.publish_period()
        );
        while !ctx.is_shutdown() {
            self.tick(transport, writer, topic, out, print, &mut stats);
            thread::sleep(ctx.publish_period());
        }
        info!(
            "publisher stopped: {} written, {} write errors",
            stats.written, stats.write_errors
        );
        stats
    }
}

fn random_velocity(rng: &mut fastrand::Rng) -> i32 {
    let magnitude = rng.i32(1..=5);
    if rng.bool() {
        magnitude
    } else {
        -magnitude
    }
}

fn bounce(pos: &mut i32, vel: &mut i32, low: i32, high: i32) {
    if *pos < low {
        *pos = low;
        *vel = -*vel;
    }
    if *pos > high {
        *pos = high;
        *vel = -*vel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionsBuilder, Role};
    use crate::output::VecOutput;
    use crate::qos::QosResolver;
    use crate::transport::loopback::LoopbackTransport;
    use crate::SHAPE_TYPE_NAME;

    fn shape(x: i32, y: i32, xvel: i32, yvel: i32) -> MotionSimulator {
        MotionSimulator::new(
            ShapeState {
                color: "BLUE".into(),
                x,
                y,
                xvel,
                yvel,
                size: 20,
            },
            Canvas::default(),
        )
    }

    #[test]
    fn test_step_without_bounce() {
        let mut sim = shape(5, 100, 3, 0);
        let state = sim.step();
        assert_eq!(state.x, 8);
        assert_eq!(state.xvel, 3);
    }

    #[test]
    fn test_step_clamps_low_wall() {
        let mut sim = shape(2, 100, 3, 0);
        assert_eq!(sim.state().half_extent(), 11);
        let state = sim.step();
        assert_eq!(state.x, 11);
        assert_eq!(state.xvel, -3);
    }

    #[test]
    fn test_step_clamps_high_wall() {
        let mut sim = shape(100, 258, 0, 4);
        let state = sim.step();
        assert_eq!(state.y, 270 - 11);
        assert_eq!(state.yvel, -4);
    }

    #[test]
    fn test_stays_inside_canvas() {
        let mut sim = shape(120, 130, 5, -4);
        for _ in 0..1000 {
            let s = sim.step();
            assert!((11..=229).contains(&s.x), "x = {}", s.x);
            assert!((11..=259).contains(&s.y), "y = {}", s.y);
        }
    }

    #[test]
    fn test_from_options_uses_explicit_velocity() {
        let options = OptionsBuilder::new()
            .topic("Square")
            .role(Role::Publish)
            .color("RED")
            .velocity(2, -1)
            .build()
            .expect("valid");
        let mut rng = fastrand::Rng::with_seed(7);
        let sim = MotionSimulator::from_options(&options, &mut rng);

        assert_eq!(sim.state().color, "RED");
        assert_eq!((sim.state().xvel, sim.state().yvel), (2, -1));
        assert!((0..240).contains(&sim.state().x));
        assert!((0..270).contains(&sim.state().y));
    }

    #[test]
    fn test_random_velocity_range() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..200 {
            let v = random_velocity(&mut rng);
            assert!((1..=5).contains(&v.abs()), "v = {}", v);
        }
    }

    #[test]
    fn test_same_seed_same_start() {
        let options = OptionsBuilder::new()
            .topic("Square")
            .role(Role::Publish)
            .build()
            .expect("valid");
        let a = MotionSimulator::from_options(&options, &mut fastrand::Rng::with_seed(3));
        let b = MotionSimulator::from_options(&options, &mut fastrand::Rng::with_seed(3));
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_tick_prints_only_written_samples() {
        let options = OptionsBuilder::new()
            .topic("Square")
            .role(Role::Publish)
            .color("RED")
            .build()
            .expect("valid");
        let resolver = QosResolver::new(&options);
        let transport = LoopbackTransport::new();
        let participant = transport.create_participant(0, None).expect("participant");
        let topic = transport
            .create_topic(&participant, "Square", SHAPE_TYPE_NAME)
            .expect("topic");
        let publisher = transport
            .create_publisher(&participant, &resolver.group())
            .expect("publisher");
        let writer = transport
            .create_writer(&publisher, &topic, &resolver.writer())
            .expect("writer");

        let mut sim = shape(100, 100, 2, 2);
        let mut out = VecOutput::default();
        let mut stats = PublishStats::default();

        sim.tick(&transport, &writer, "Square", &mut out, true, &mut stats);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(stats.written, 1);

        transport.fail_next_writes(1);
        sim.tick(&transport, &writer, "Square", &mut out, true, &mut stats);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.ticks, 2);

        sim.tick(&transport, &writer, "Square", &mut out, true, &mut stats);
        assert_eq!(out.samples.len(), 2);
        assert_eq!(out.samples[1].1.x, 106);
    }
}
