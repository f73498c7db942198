//! View-frustum extraction and sphere classification.
//!
//! Planes are pulled straight out of the combined `projection * view` matrix
//! (OpenGL clip-space convention, `-w <= z <= w`) and normalised so that a
//! plane evaluated at a point yields its signed distance in world units.
//! Positive distances lie inside.

use cgmath::{Matrix4, Vector4};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Outside,
    Intersecting,
    Inside,
}

impl Classification {
    /// Anything that is not fully outside gets drawn.
    pub fn is_visible(self) -> bool {
        self != Classification::Outside
    }
}

/// Six planes `(a, b, c, d)` ordered right, left, bottom, top, far, near.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [[f32; 4]; 6],
}

impl Frustum {
    pub fn from_matrices(view: &Matrix4<f32>, projection: &Matrix4<f32>) -> Self {
        Self::from_clip(&(projection * view))
    }

    pub fn from_clip(clip: &Matrix4<f32>) -> Self {
        // cgmath is column-major: row i is (x[i], y[i], z[i], w[i]).
        let row = |i: usize| Vector4::new(clip.x[i], clip.y[i], clip.z[i], clip.w[i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let planes = [r3 - r0, r3 + r0, r3 + r1, r3 - r1, r3 - r2, r3 + r2].map(normalize);
        Self { planes }
    }

    pub fn planes(&self) -> &[[f32; 4]; 6] {
        &self.planes
    }

    fn distance(plane: &[f32; 4], x: f32, y: f32, z: f32) -> f32 {
        plane[0] * x + plane[1] * y + plane[2] * z + plane[3]
    }

    pub fn point_inside(&self, x: f32, y: f32, z: f32) -> bool {
        self.planes.iter().all(|p| Self::distance(p, x, y, z) >= 0.0)
    }

    pub fn classify_sphere(&self, x: f32, y: f32, z: f32, radius: f32) -> Classification {
        let mut result = Classification::Inside;
        for plane in &self.planes {
            let d = Self::distance(plane, x, y, z);
            if d < -radius {
                return Classification::Outside;
            }
            if d < radius {
                result = Classification::Intersecting;
            }
        }
        result
    }
}

fn normalize(plane: Vector4<f32>) -> [f32; 4] {
    let len = (plane.x * plane.x + plane.y * plane.y + plane.z * plane.z).sqrt();
    if len == 0.0 {
        return plane.into();
    }
    (plane / len).into()
}
