//! Penalty contact model for planes and balls

use cgmath::InnerSpace;

use crate::math::{normalize_or_zero, Vec3};

/// Scalars shared by every contact evaluation of one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactParams {
    /// Penalty stiffness, N/m of penetration.
    pub stiffness: f64,
    /// Tangential speed under which a contact may stick.
    pub epsilon: f64,
    pub dt: f64,
}

/// Kinematic state of the mass being tested.
#[derive(Debug, Clone, Copy)]
pub struct ContactProbe {
    pub pos: Vec3,
    pub vel: Vec3,
    /// Every other force acting on the mass this step.
    pub force: Vec3,
    pub m: f64,
}

/// Static half-space. Points with `normal·x < offset` are inside the solid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPlane {
    /// Unit outward normal.
    pub normal: Vec3,
    pub offset: f64,
    pub friction_kinetic: f64,
    pub friction_static: f64,
}

impl ContactPlane {
    /// Build a plane, normalizing `normal`. Returns `None` for a zero normal.
    pub fn new(normal: Vec3, offset: f64, friction_kinetic: f64, friction_static: f64) -> Option<Self> {
        let len = normal.magnitude();
        if !(len.is_finite() && len > f64::EPSILON) {
            return None;
        }
        Some(Self {
            normal: normal / len,
            // scale the offset with the normal so the plane stays put
            offset: offset / len,
            friction_kinetic,
            friction_static,
        })
    }

    /// Signed distance of `pos` above the surface. Negative means penetration.
    pub fn distance(&self, pos: Vec3) -> f64 {
        self.normal.dot(pos) - self.offset
    }

    /// Contact plus friction force on a probe, zero when it is outside.
    pub fn reaction(&self, probe: &ContactProbe, params: &ContactParams) -> Vec3 {
        let depth = -self.distance(probe.pos);
        if depth <= 0.0 {
            return Vec3::new(0.0, 0.0, 0.0);
        }
        let normal_load = depth * params.stiffness;
        let push = self.normal * normal_load;

        let f_t = probe.force - self.normal * probe.force.dot(self.normal);
        let v_t = probe.vel - self.normal * probe.vel.dot(self.normal);
        let speed = v_t.magnitude();

        let friction = if speed < params.epsilon {
            let applied = f_t.magnitude();
            if applied <= self.friction_static * normal_load {
                -f_t
            } else {
                -normalize_or_zero(f_t) * (self.friction_kinetic * normal_load)
            }
        } else {
            // never strong enough to reverse the sliding direction in one step
            let limit = probe.m * speed / params.dt;
            -(v_t / speed) * (self.friction_kinetic * normal_load).min(limit)
        };
        push + friction
    }
}

/// Static solid sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub center: Vec3,
    pub radius: f64,
}

impl Ball {
    pub fn new(center: Vec3, radius: f64) -> Option<Self> {
        (radius.is_finite() && radius >= 0.0).then_some(Self { center, radius })
    }

    pub fn contains(&self, pos: Vec3) -> bool {
        (pos - self.center).magnitude2() < self.radius * self.radius
    }

    /// Radial penalty force pushing a probe back to the surface.
    pub fn reaction(&self, probe: &ContactProbe, params: &ContactParams) -> Vec3 {
        let offset = probe.pos - self.center;
        let dist = offset.magnitude();
        if dist >= self.radius {
            return Vec3::new(0.0, 0.0, 0.0);
        }
        normalize_or_zero(offset) * ((self.radius - dist) * params.stiffness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: ContactParams = ContactParams {
        stiffness: 1000.0,
        epsilon: 1e-6,
        dt: 0.01,
    };

    fn probe(pos: [f64; 3], vel: [f64; 3], force: [f64; 3]) -> ContactProbe {
        ContactProbe {
            pos: pos.into(),
            vel: vel.into(),
            force: force.into(),
            m: 1.0,
        }
    }

    fn floor(mu_k: f64, mu_s: f64) -> ContactPlane {
        ContactPlane::new(Vec3::new(0.0, 0.0, 2.0), 0.0, mu_k, mu_s).unwrap()
    }

    #[test]
    fn test_plane_normalizes() {
        let plane = ContactPlane::new(Vec3::new(0.0, 0.0, 2.0), 1.0, 0.0, 0.0).unwrap();
        assert_eq!(plane.normal, Vec3::new(0.0, 0.0, 1.0));
        assert!((plane.distance(Vec3::new(0.0, 0.0, 0.5))).abs() < 1e-12);
        assert!(ContactPlane::new(Vec3::new(0.0, 0.0, 0.0), 1.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_plane_outside_is_free() {
        let f = floor(0.5, 0.5).reaction(&probe([0.0, 0.0, 0.1], [0.0; 3], [0.0, 0.0, -9.8]), &PARAMS);
        assert_eq!(f, Vec3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_plane_penalty_pushes_out() {
        let f = floor(0.0, 0.0).reaction(&probe([0.0, 0.0, -0.01], [0.0; 3], [0.0; 3]), &PARAMS);
        assert!((f - Vec3::new(0.0, 0.0, 10.0)).magnitude() < 1e-9);
    }

    #[test]
    fn test_static_friction_holds() {
        let f = floor(0.2, 0.5).reaction(&probe([0.0, 0.0, -0.01], [0.0; 3], [3.0, 0.0, 0.0]), &PARAMS);
        // load 10 N, static limit 5 N: tangential push fully cancelled
        assert!((f - Vec3::new(-3.0, 0.0, 10.0)).magnitude() < 1e-9);
    }

    #[test]
    fn test_static_friction_breaks_away() {
        let f = floor(0.2, 0.5).reaction(&probe([0.0, 0.0, -0.01], [0.0; 3], [8.0, 0.0, 0.0]), &PARAMS);
        assert!((f - Vec3::new(-2.0, 0.0, 10.0)).magnitude() < 1e-9);
    }

    #[test]
    fn test_kinetic_friction_opposes_sliding() {
        let f = floor(0.2, 0.5).reaction(&probe([0.0, 0.0, -0.01], [0.0, 1.0, 0.0], [0.0; 3]), &PARAMS);
        assert!((f - Vec3::new(0.0, -2.0, 10.0)).magnitude() < 1e-9);

        // slow slide: capped at m·v/dt
        let f = floor(0.2, 0.5).reaction(&probe([0.0, 0.0, -0.01], [0.0, 0.001, 0.0], [0.0; 3]), &PARAMS);
        assert!((f.y + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_ball_pushes_radially() {
        let ball = Ball::new(Vec3::new(0.0, 0.0, 0.0), 1.0).unwrap();
        assert!(ball.contains(Vec3::new(0.0, 0.9, 0.0)));
        let f = ball.reaction(&probe([0.0, 0.9, 0.0], [0.0; 3], [0.0; 3]), &PARAMS);
        assert!((f - Vec3::new(0.0, 100.0, 0.0)).magnitude() < 1e-9);
        let f = ball.reaction(&probe([0.0, 1.5, 0.0], [0.0; 3], [0.0; 3]), &PARAMS);
        assert_eq!(f, Vec3::new(0.0, 0.0, 0.0));
        assert!(Ball::new(Vec3::new(0.0, 0.0, 0.0), -1.0).is_none());
    }
}
