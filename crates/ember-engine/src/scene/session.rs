/// Id counters owned by one loaded scene.
///
/// Ids are dense and start at zero. [`Self::reset`] is called when the scene
/// is torn down so the next scene starts over.
#[derive(Debug, Default)]
pub struct SceneSession {
    next_object: u32,
    next_texture: u32,
}

impl SceneSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_object_id(&mut self) -> u32 {
        let id = self.next_object;
        self.next_object += 1;
        id
    }

    pub fn next_texture_id(&mut self) -> u32 {
        let id = self.next_texture;
        self.next_texture += 1;
        id
    }

    pub fn object_count(&self) -> u32 {
        self.next_object
    }

    pub fn texture_count(&self) -> u32 {
        self.next_texture
    }

    pub fn reset(&mut self) {
        self.next_object = 0;
        self.next_texture = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_restart_after_reset() {
        let mut session = SceneSession::new();
        assert_eq!(session.next_object_id(), 0);
        assert_eq!(session.next_object_id(), 1);
        assert_eq!(session.next_texture_id(), 0);
        assert_eq!(session.object_count(), 2);
        assert_eq!(session.texture_count(), 1);

        session.reset();
        assert_eq!(session.texture_count(), 0);
        assert_eq!(session.next_object_id(), 0);
        assert_eq!(session.next_texture_id(), 0);
    }
}
