mod renderer;

pub use renderer::ParticleRenderer;

use std::f32::consts::TAU;

pub const EARTH_RADIUS: f32 = 3.0;
pub const FIRE_RADIUS: f32 = 4.0;
pub const FIRE_SPREAD: f32 = 0.8;
const FIRE_JITTER: f32 = 0.1;

/// Radians per second around the vertical axis.
const EARTH_SPIN: f32 = 0.1;
const FIRE_SPIN: f32 = -0.2;

const EARTH_SEED: u64 = 0x0E41_27A5;
const FIRE_SEED: u64 = 0x0F1E_0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn rotate_y(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(
            self.x * cos + self.z * sin,
            self.y,
            -self.x * sin + self.z * cos,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    /// Later points overwrite earlier ones.
    Over,
    /// Colors add up and saturate.
    Additive,
}

#[derive(Debug, Clone)]
pub struct ParticleLayer {
    base: Vec<Point3>,
    colors: Vec<[u8; 3]>,
    spin: f32,
    jitter: bool,
    blend: Blend,
    opacity: f32,
}

impl ParticleLayer {
    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn blend(&self) -> Blend {
        self.blend
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// World positions at `t` seconds into the animation.
    pub fn positions(&self, t: f32) -> impl Iterator<Item = Point3> + '_ {
        let angle = self.spin * t;
        self.base.iter().enumerate().map(move |(i, p)| {
            let p = if self.jitter {
                let phase = i as f32;
                Point3::new(
                    p.x + (t * 2.0 + phase).sin() * FIRE_JITTER,
                    p.y + (t * 2.0 + phase).cos() * FIRE_JITTER,
                    p.z + (t * 3.0 + phase).sin() * FIRE_JITTER,
                )
            } else {
                *p
            };
            p.rotate_y(angle)
        })
    }
}

/// Blue-green earth sphere inside a counter-rotating shell of fire.
#[derive(Debug, Clone)]
pub struct ParticleField {
    earth: ParticleLayer,
    fire: ParticleLayer,
}

impl ParticleField {
    pub fn new(earth_particles: u32, fire_particles: u32) -> Self {
        Self {
            earth: earth_layer(earth_particles as usize),
            fire: fire_layer(fire_particles as usize),
        }
    }

    pub fn earth(&self) -> &ParticleLayer {
        &self.earth
    }

    pub fn fire(&self) -> &ParticleLayer {
        &self.fire
    }

    /// Back to front draw order.
    pub fn layers(&self) -> [&ParticleLayer; 2] {
        [&self.earth, &self.fire]
    }
}

fn earth_layer(count: usize) -> ParticleLayer {
    let mut rng = Scatter::new(EARTH_SEED);
    let mut base = Vec::with_capacity(count);
    let mut colors = Vec::with_capacity(count);
    for _ in 0..count {
        base.push(rng.on_sphere(EARTH_RADIUS));
        colors.push(to_rgb8(
            0.1 + rng.next_f32() * 0.2,
            0.3 + rng.next_f32() * 0.3,
            0.6 + rng.next_f32() * 0.4,
        ));
    }
    ParticleLayer {
        base,
        colors,
        spin: EARTH_SPIN,
        jitter: false,
        blend: Blend::Over,
        opacity: 0.8,
    }
}

fn fire_layer(count: usize) -> ParticleLayer {
    let mut rng = Scatter::new(FIRE_SEED);
    let mut base = Vec::with_capacity(count);
    let mut colors = Vec::with_capacity(count);
    for _ in 0..count {
        let radius = FIRE_RADIUS + rng.next_f32() * FIRE_SPREAD;
        base.push(rng.on_sphere(radius));

        let pick = rng.next_f32();
        let color = if pick < 0.3 {
            // red
            to_rgb8(0.8 + rng.next_f32() * 0.2, 0.1 + rng.next_f32() * 0.2, 0.0)
        } else if pick < 0.7 {
            // orange
            to_rgb8(0.9 + rng.next_f32() * 0.1, 0.4 + rng.next_f32() * 0.3, 0.0)
        } else {
            // yellow
            to_rgb8(
                0.9 + rng.next_f32() * 0.1,
                0.7 + rng.next_f32() * 0.3,
                rng.next_f32() * 0.2,
            )
        };
        colors.push(color);
    }
    ParticleLayer {
        base,
        colors,
        spin: FIRE_SPIN,
        jitter: true,
        blend: Blend::Additive,
        opacity: 0.7,
    }
}

fn to_rgb8(r: f32, g: f32, b: f32) -> [u8; 3] {
    let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [c(r), c(g), c(b)]
}

/// Seeded SplitMix64, so the same counts always give the same scene.
struct Scatter(u64);

impl Scatter {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform point on a sphere surface.
    fn on_sphere(&mut self, radius: f32) -> Point3 {
        let theta = self.next_f32() * TAU;
        let phi = (2.0 * self.next_f32() - 1.0).clamp(-1.0, 1.0).acos();
        Point3::new(
            radius * phi.sin() * theta.cos(),
            radius * phi.sin() * theta.sin(),
            radius * phi.cos(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn radius(p: &Point3) -> f32 {
        (p.x * p.x + p.y * p.y + p.z * p.z).sqrt()
    }

    #[test]
    fn test_layer_sizes() {
        let field = ParticleField::new(3000, 5000);
        assert_eq!(field.earth().len(), 3000);
        assert_eq!(field.fire().len(), 5000);
        assert_eq!(field.fire().blend(), Blend::Additive);
        assert!(ParticleField::new(0, 0).earth().is_empty());
    }

    #[test]
    fn test_earth_points_on_sphere() {
        let field = ParticleField::new(500, 0);
        for t in [0.0, 1.5, 30.0] {
            for p in field.earth().positions(t) {
                assert!((radius(&p) - EARTH_RADIUS).abs() < EPS, "{:?}", p);
            }
        }
    }

    #[test]
    fn test_fire_points_stay_in_shell() {
        let field = ParticleField::new(0, 500);
        // Jitter moves a point at most 0.1 per axis.
        let slack = FIRE_JITTER * 3f32.sqrt() + EPS;
        for t in [0.0, 0.7, 12.0] {
            for p in field.fire().positions(t) {
                let r = radius(&p);
                assert!(r.is_finite());
                assert!(r >= FIRE_RADIUS - slack && r <= FIRE_RADIUS + FIRE_SPREAD + slack);
            }
        }
    }

    #[test]
    fn test_scene_is_deterministic() {
        let a = ParticleField::new(100, 100);
        let b = ParticleField::new(100, 100);
        let pa: Vec<_> = a.fire().positions(2.0).collect();
        let pb: Vec<_> = b.fire().positions(2.0).collect();
        assert_eq!(pa, pb);
        assert_eq!(a.earth().colors(), b.earth().colors());
    }

    #[test]
    fn test_layers_counter_rotate() {
        let field = ParticleField::new(1, 0);
        let start = field.earth().positions(0.0).next().unwrap();
        let later = field.earth().positions(10.0).next().unwrap();
        // 1 rad around y keeps height and radius.
        assert!((start.y - later.y).abs() < EPS);
        assert!((radius(&start) - radius(&later)).abs() < EPS);
        assert!(EARTH_SPIN > 0.0 && FIRE_SPIN < 0.0);
    }

    #[test]
    fn test_fire_colors_are_warm() {
        let field = ParticleField::new(0, 200);
        for [r, _, b] in field.fire().colors() {
            assert!(*r >= 204);
            assert!(*b <= 51);
        }
    }
}
