// Re-export glam for convenience
pub use glam::*;

// USD matrix conventions
mod transform;
pub use transform::{translation_of, Mat4Ext, UpAxis};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_of_reexport() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(translation_of(&m), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_up_axis_reexport() {
        assert_eq!(UpAxis::default(), UpAxis::Y);
    }
}
