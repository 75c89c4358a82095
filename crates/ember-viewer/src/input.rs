use ember_engine::PassToggles;
use ember_engine::scene::CameraControl;
use winit::keyboard::{KeyCode, PhysicalKey};

/// Pass selectable from the keyboard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassKind {
    Opaque,
    Skybox,
    Blit,
    RayTrace,
}

impl PassKind {
    pub fn toggle(self, toggles: &mut PassToggles) {
        let flag = match self {
            PassKind::Opaque => &mut toggles.opaque,
            PassKind::Skybox => &mut toggles.skybox,
            PassKind::Blit => &mut toggles.blit,
            PassKind::RayTrace => &mut toggles.ray_trace,
        };
        *flag = !*flag;
    }
}

/// What a key press asks the viewer to do.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    Camera(CameraControl),
    Toggle(PassKind),
    Exit,
}

/// Maps a pressed physical key to a viewer action.
///
/// A/D strafe, W/S move, Q/E yaw, Z/X pitch, C resets the camera.
/// Digits 1-4 toggle the opaque, skybox, blit and ray-trace passes.
pub fn map_key(key: PhysicalKey) -> Option<Action> {
    let PhysicalKey::Code(code) = key else {
        return None;
    };
    let action = match code {
        KeyCode::KeyA => Action::Camera(CameraControl::MoveLeft),
        KeyCode::KeyD => Action::Camera(CameraControl::MoveRight),
        KeyCode::KeyW => Action::Camera(CameraControl::MoveForward),
        KeyCode::KeyS => Action::Camera(CameraControl::MoveBack),
        KeyCode::KeyQ => Action::Camera(CameraControl::YawLeft),
        KeyCode::KeyE => Action::Camera(CameraControl::YawRight),
        KeyCode::KeyZ => Action::Camera(CameraControl::PitchUp),
        KeyCode::KeyX => Action::Camera(CameraControl::PitchDown),
        KeyCode::KeyC => Action::Camera(CameraControl::Reset),

        KeyCode::Digit1 => Action::Toggle(PassKind::Opaque),
        KeyCode::Digit2 => Action::Toggle(PassKind::Skybox),
        KeyCode::Digit3 => Action::Toggle(PassKind::Blit),
        KeyCode::Digit4 => Action::Toggle(PassKind::RayTrace),

        KeyCode::Escape => Action::Exit,
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use winit::keyboard::NativeKeyCode;

    use super::*;

    #[test]
    fn maps_camera_and_pass_keys() {
        assert_eq!(
            map_key(PhysicalKey::Code(KeyCode::KeyW)),
            Some(Action::Camera(CameraControl::MoveForward))
        );
        assert_eq!(
            map_key(PhysicalKey::Code(KeyCode::Digit4)),
            Some(Action::Toggle(PassKind::RayTrace))
        );
        assert_eq!(map_key(PhysicalKey::Code(KeyCode::KeyP)), None);
        assert_eq!(map_key(PhysicalKey::Unidentified(NativeKeyCode::Unidentified)), None);
    }

    #[test]
    fn toggling_flips_one_pass() {
        let mut toggles = PassToggles::default();
        PassKind::Skybox.toggle(&mut toggles);

        assert!(!toggles.skybox);
        assert!(toggles.opaque && toggles.blit && toggles.ray_trace);

        PassKind::Skybox.toggle(&mut toggles);
        assert_eq!(toggles, PassToggles::default());
    }
}
