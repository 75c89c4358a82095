use glam::{Mat4, Vec3};

use crate::gpu::command::{ScissorRect, Viewport};

/// View state the passes consume each frame.
pub trait Camera {
    fn view_proj(&self) -> Mat4;
    fn position(&self) -> Vec3;
    fn viewport(&self) -> Viewport;
    fn scissor(&self) -> ScissorRect;
}

/// One discrete camera input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CameraControl {
    MoveLeft,
    MoveRight,
    MoveForward,
    MoveBack,
    YawLeft,
    YawRight,
    PitchUp,
    PitchDown,
    Reset,
}

const MOVE_STEP: f32 = 0.25;
const TURN_STEP: f32 = 0.05;
const PITCH_LIMIT: f32 = 1.5;

const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;
const NEAR: f32 = 0.1;
const FAR: f32 = 100.0;

const HOME: Vec3 = Vec3::new(0.0, 2.0, 8.0);
const HOME_PITCH: f32 = -0.15;

/// Camera moved along the world X/Z axes and rotated around Y and X.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    position: Vec3,
    yaw: f32,
    pitch: f32,
    width: u32,
    height: u32,
}

impl FlyCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            position: HOME,
            yaw: 0.0,
            pitch: HOME_PITCH,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn apply(&mut self, control: CameraControl) {
        match control {
            CameraControl::MoveLeft => self.position.x -= MOVE_STEP,
            CameraControl::MoveRight => self.position.x += MOVE_STEP,
            CameraControl::MoveForward => self.position.z -= MOVE_STEP,
            CameraControl::MoveBack => self.position.z += MOVE_STEP,
            CameraControl::YawLeft => self.yaw += TURN_STEP,
            CameraControl::YawRight => self.yaw -= TURN_STEP,
            CameraControl::PitchUp => {
                self.pitch = (self.pitch + TURN_STEP).min(PITCH_LIMIT);
            }
            CameraControl::PitchDown => {
                self.pitch = (self.pitch - TURN_STEP).max(-PITCH_LIMIT);
            }
            CameraControl::Reset => {
                self.position = HOME;
                self.yaw = 0.0;
                self.pitch = HOME_PITCH;
            }
        }
    }

    fn forward(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(-sy * cp, sp, -cy * cp)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    /// Right-handed projection with depth in `[0, 1]`.
    pub fn projection(&self) -> Mat4 {
        let aspect = self.width as f32 / self.height as f32;
        Mat4::perspective_rh(FOV_Y, aspect, NEAR, FAR)
    }
}

impl Camera for FlyCamera {
    fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn viewport(&self) -> Viewport {
        Viewport::new(self.width as f32, self.height as f32)
    }

    fn scissor(&self) -> ScissorRect {
        ScissorRect::new(self.width as i32, self.height as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_home_pose() {
        let mut camera = FlyCamera::new(64, 48);
        let home = camera.view_proj();
        camera.apply(CameraControl::MoveLeft);
        camera.apply(CameraControl::YawRight);
        assert_ne!(camera.view_proj(), home);
        camera.apply(CameraControl::Reset);
        assert_eq!(camera.view_proj(), home);
    }

    #[test]
    fn points_ahead_project_inside_depth_range() {
        let camera = FlyCamera::new(64, 48);
        let ahead = camera.position() + camera.forward() * 10.0;
        let clip = camera.view_proj() * ahead.extend(1.0);
        let z = clip.z / clip.w;
        assert!((0.0..1.0).contains(&z));
    }
}
