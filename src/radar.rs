//! Radar geometry and the decaying particle field.
//!
//! The geometry is the single pixel mapping shared by the renderer and the
//! overlay controller, so canvas drawing and marker placement can never
//! disagree. Normalized coordinates are the source of truth; everything
//! here is a pure transform of them.

use std::f32::consts::TAU;

use glam::Vec2;
use rand::Rng;

use crate::events::EventCategory;
use crate::params::{ParticleStyle, ParticleStyles, RadarStyle};
use crate::rendering::ShapeInstance;

/// Pixel mapping of the radar field, recomputed once per resize.
#[derive(Debug, Clone, Copy)]
pub struct RadarGeometry {
    pub width: f32,
    pub height: f32,
    pub center: Vec2,
    /// Usable radius in pixels; normalized (0,1) spans the full diameter
    pub max_radius: f32,
}

impl RadarGeometry {
    pub fn new(width: f32, height: f32, style: &RadarStyle) -> Self {
        let half_extent = 0.5 * width.min(height);
        Self {
            width,
            height,
            center: Vec2::new(width * 0.5, height * 0.5),
            max_radius: half_extent * (1.0 - style.margin_frac),
        }
    }

    /// Normalized field position to screen pixels.
    pub fn to_screen(&self, norm: Vec2) -> Vec2 {
        self.center + (norm - Vec2::splat(0.5)) * (2.0 * self.max_radius)
    }

    /// Screen pixels to normalized field position (unclamped).
    pub fn to_norm(&self, screen: Vec2) -> Vec2 {
        (screen - self.center) / (2.0 * self.max_radius) + Vec2::splat(0.5)
    }

    /// Instances for the static radar layer: range rings, axis lines and
    /// the fixed listener marker at the center. Drawn every frame; also
    /// the first and last frame of every animation run.
    pub fn static_layer(&self, style: &RadarStyle, scale: f32, out: &mut Vec<ShapeInstance>) {
        let ring_color = [0.18, 0.55, 0.45, 0.35];
        let axis_color = [0.18, 0.55, 0.45, 0.18];

        for frac in style.ring_fractions {
            let r = self.max_radius * frac;
            out.push(ShapeInstance::ring(self.center, r, 1.5 * scale, ring_color));
        }
        out.push(ShapeInstance::rect(
            self.center,
            Vec2::new(self.max_radius, 0.75 * scale),
            axis_color,
        ));
        out.push(ShapeInstance::rect(
            self.center,
            Vec2::new(0.75 * scale, self.max_radius),
            axis_color,
        ));

        // Listener at the origin
        out.push(ShapeInstance::glow(
            self.center,
            10.0 * scale,
            [0.9, 0.95, 1.0, 0.5],
        ));
        out.push(ShapeInstance::disc(
            self.center,
            3.5 * scale,
            [0.9, 0.95, 1.0, 0.9],
        ));
    }
}

/// Transient visual-only entity; no persistence, no cross-component
/// visibility.
#[derive(Debug, Clone)]
pub struct Particle {
    pub pos: Vec2,
    pub vel: Vec2,
    pub size: f32,
    pub color: [f32; 3],
    pub alpha: f32,
    pub lifetime: u32,
    pub max_lifetime: u32,
}

/// Animation loop state. The loop runs only while particles are live so
/// the surface sits idle at zero cost between bursts of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Running,
}

/// Particle system owning the particle list and the loop state machine.
pub struct ParticleField {
    particles: Vec<Particle>,
    state: AnimationState,
    styles: ParticleStyles,
}

impl ParticleField {
    pub fn new(styles: ParticleStyles) -> Self {
        Self {
            particles: Vec::new(),
            state: AnimationState::Idle,
            styles,
        }
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AnimationState::Running
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Size/lifetime for an event: completion gets the largest and
    /// longest; the before/after action pair gets a smaller one, larger
    /// still for the distinguished subtype; everything else the default.
    pub fn select_style(&self, category: EventCategory, major: bool) -> ParticleStyle {
        match category {
            EventCategory::Completion => self.styles.completion,
            EventCategory::ActionPre | EventCategory::ActionPost => {
                if major {
                    self.styles.action_major
                } else {
                    self.styles.action
                }
            }
            EventCategory::Other => self.styles.default_blip,
        }
    }

    /// Append a particle at a screen position. Spawning while idle starts
    /// the animation loop.
    pub fn spawn(&mut self, category: EventCategory, major: bool, pos: Vec2, color: [f32; 3]) {
        let style = self.select_style(category, major);
        let mut rng = rand::thread_rng();
        let angle = rng.gen::<f32>() * TAU;
        let speed = rng.gen_range(0.2..0.9);
        self.particles.push(Particle {
            pos,
            vel: Vec2::new(angle.cos(), angle.sin()) * speed,
            size: style.size_px,
            color,
            alpha: 1.0,
            lifetime: style.lifetime_ticks,
            max_lifetime: style.lifetime_ticks,
        });
        self.state = AnimationState::Running;
    }

    /// Advance one tick: decrement lifetimes, integrate motion, shrink,
    /// drop the dead. Returns whether the loop is still running; the tick
    /// that removes the last particle stops the loop itself.
    pub fn tick(&mut self) -> bool {
        if self.state == AnimationState::Idle {
            return false;
        }
        let shrink = self.styles.shrink_per_tick;
        for p in &mut self.particles {
            p.lifetime -= 1;
            p.alpha = p.lifetime as f32 / p.max_lifetime as f32;
            p.pos += p.vel;
            p.size *= shrink;
        }
        self.particles.retain(|p| p.lifetime > 0);
        if self.particles.is_empty() {
            self.state = AnimationState::Idle;
            return false;
        }
        true
    }

    /// Draw instances: a soft outer glow behind an opaque core per
    /// particle.
    pub fn instances(&self, out: &mut Vec<ShapeInstance>) {
        for p in &self.particles {
            let [r, g, b] = p.color;
            out.push(ShapeInstance::glow(
                p.pos,
                p.size * 2.4,
                [r, g, b, p.alpha * 0.45],
            ));
            out.push(ShapeInstance::disc(p.pos, p.size, [r, g, b, p.alpha]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::RadarStyle;

    fn geom() -> RadarGeometry {
        RadarGeometry::new(800.0, 600.0, &RadarStyle::default())
    }

    #[test]
    fn test_geometry_center_maps_to_screen_center() {
        let g = geom();
        let p = g.to_screen(Vec2::splat(0.5));
        assert!((p - Vec2::new(400.0, 300.0)).length() < 1e-4);
    }

    #[test]
    fn test_geometry_round_trip() {
        let g = geom();
        for norm in [
            Vec2::new(0.1, 0.9),
            Vec2::new(0.5, 0.5),
            Vec2::new(0.05, 0.95),
            Vec2::new(0.73, 0.21),
        ] {
            let back = g.to_norm(g.to_screen(norm));
            assert!((back - norm).length() < 1e-5);
        }
    }

    #[test]
    fn test_style_selection_ordering() {
        let field = ParticleField::new(ParticleStyles::default());
        let completion = field.select_style(EventCategory::Completion, false);
        let action = field.select_style(EventCategory::ActionPre, false);
        let major = field.select_style(EventCategory::ActionPost, true);
        let other = field.select_style(EventCategory::Other, false);

        assert!(completion.size_px > major.size_px);
        assert!(major.size_px > action.size_px);
        assert!(completion.lifetime_ticks > other.lifetime_ticks);
    }

    #[test]
    fn test_particle_termination() {
        let mut field = ParticleField::new(ParticleStyles::default());
        assert_eq!(field.state(), AnimationState::Idle);
        assert!(!field.tick()); // ticking while idle is a no-op

        field.spawn(
            EventCategory::ActionPre,
            false,
            Vec2::new(10.0, 10.0),
            [1.0, 0.5, 0.0],
        );
        assert_eq!(field.state(), AnimationState::Running);

        let max = field.particles()[0].max_lifetime;
        let mut prev = max;
        let mut ticks = 0;
        while field.tick() {
            let p = &field.particles()[0];
            assert!(p.lifetime < prev, "lifetime must strictly decrease");
            assert!((p.alpha - p.lifetime as f32 / max as f32).abs() < 1e-6);
            prev = p.lifetime;
            ticks += 1;
            assert!(ticks <= max, "particle outlived its lifetime");
        }

        // The tick that removed the last particle also stopped the loop
        assert!(field.particles().is_empty());
        assert_eq!(field.state(), AnimationState::Idle);
    }

    #[test]
    fn test_particles_shrink() {
        let mut field = ParticleField::new(ParticleStyles::default());
        field.spawn(
            EventCategory::Completion,
            false,
            Vec2::ZERO,
            [0.0, 1.0, 0.0],
        );
        let initial = field.particles()[0].size;
        field.tick();
        assert!(field.particles()[0].size < initial);
    }

    #[test]
    fn test_spawn_restarts_loop() {
        let mut field = ParticleField::new(ParticleStyles::default());
        field.spawn(EventCategory::Other, false, Vec2::ZERO, [1.0, 1.0, 1.0]);
        while field.tick() {}
        assert_eq!(field.state(), AnimationState::Idle);
        field.spawn(EventCategory::Other, false, Vec2::ZERO, [1.0, 1.0, 1.0]);
        assert_eq!(field.state(), AnimationState::Running);
    }
}
