//! A free-flying first-person camera.
//!
//! Matrices follow the OpenGL convention (clip depth in `[-w, w]`); the
//! shaders map depth into wgpu's `[0, w]` range themselves.

use std::f32::consts::{FRAC_PI_2, PI};

use cgmath::{Deg, InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};

pub const FOVY: Deg<f32> = Deg(45.0);
pub const ZNEAR: f32 = 0.1;
pub const ZFAR: f32 = 10_000.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    /// Around +Y, radians. `PI` looks down -Z.
    pub horizontal_angle: f32,
    /// Up/down, radians.
    pub vertical_angle: f32,
    pub direction: Vector3<f32>,
    pub right: Vector3<f32>,
    pub up: Vector3<f32>,
    aspect: f32,
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            position: Point3::new(0.0, 1.0, 0.0),
            horizontal_angle: PI,
            vertical_angle: 0.0,
            direction: -Vector3::unit_z(),
            right: Vector3::unit_x(),
            up: Vector3::unit_y(),
            aspect: 1.0,
            view: Matrix4::from_scale(1.0),
            projection: Matrix4::from_scale(1.0),
        };
        camera.resize(width, height);
        camera.aim(0.0, 0.0);
        camera.update();
        camera
    }

    pub fn at(position: Point3<f32>, width: u32, height: u32) -> Self {
        let mut camera = Self::new(width, height);
        camera.position = position;
        camera.update();
        camera
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
        self.projection = perspective(FOVY, self.aspect, ZNEAR, ZFAR);
    }

    /// Turn by `x` radians around the vertical axis and tilt by `y` radians.
    pub fn aim(&mut self, x: f32, y: f32) {
        self.horizontal_angle += x;
        self.vertical_angle += y;
        let (h, v) = (self.horizontal_angle, self.vertical_angle);

        self.direction = Vector3::new(v.cos() * h.sin(), v.sin(), v.cos() * h.cos());
        self.right = Vector3::new((h - FRAC_PI_2).sin(), 0.0, (h - FRAC_PI_2).cos());
        self.up = self.right.cross(self.direction);
    }

    pub fn move_forward(&mut self, amount: f32) {
        self.position += self.direction * amount;
    }

    pub fn move_backward(&mut self, amount: f32) {
        self.move_forward(-amount);
    }

    pub fn move_right(&mut self, amount: f32) {
        self.position += self.right * amount;
    }

    pub fn move_left(&mut self, amount: f32) {
        self.move_right(-amount);
    }

    /// Recompute the view matrix after moving or aiming.
    pub fn update(&mut self) {
        self.view = Matrix4::look_to_rh(self.position, self.direction.normalize(), self.up);
    }

    pub fn view(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn projection(&self) -> Matrix4<f32> {
        self.projection
    }

    pub fn fovy(&self) -> Rad<f32> {
        FOVY.into()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Transform, Vector4};

    use super::*;

    #[test]
    fn starts_looking_down_negative_z() {
        let camera = Camera::new(800, 600);
        let direction: [f32; 3] = camera.direction.into();
        let up: [f32; 3] = camera.up.into();
        for (got, want) in direction.into_iter().zip([0.0, 0.0, -1.0]) {
            assert_relative_eq!(got, want, epsilon = 1e-6);
        }
        for (got, want) in up.into_iter().zip([0.0, 1.0, 0.0]) {
            assert_relative_eq!(got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn view_puts_the_target_in_front() {
        let camera = Camera::at(Point3::new(5.0, 2.0, 5.0), 800, 600);
        let target = camera.position + camera.direction * 10.0;
        let eye_space = camera.view().transform_point(target);
        assert_relative_eq!(eye_space.z, -10.0, epsilon = 1e-4);

        let clip = camera.projection() * camera.view() * Vector4::new(target.x, target.y, target.z, 1.0);
        assert!(clip.z.abs() <= clip.w);
    }

    #[test]
    fn strafing_keeps_height() {
        let mut camera = Camera::new(1, 1);
        camera.aim(0.3, 0.2);
        let y = camera.position.y;
        camera.move_right(4.0);
        camera.move_left(1.0);
        assert_relative_eq!(camera.position.y, y, epsilon = 1e-6);
    }
}
