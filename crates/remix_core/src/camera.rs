//! UsdGeom cameras.

use serde::{Deserialize, Serialize};

use crate::usd::{Attribute, ComposedPrim, PrimSpec, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    Perspective,
    Orthographic,
}

impl Projection {
    pub fn as_token(&self) -> &'static str {
        match self {
            Projection::Perspective => "perspective",
            Projection::Orthographic => "orthographic",
        }
    }
}

/// Camera parameters, in the units USD authors them: millimetres for focal
/// length and apertures, scene units for the clipping range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraData {
    pub projection: Projection,
    pub focal_length: f32,
    pub horizontal_aperture: f32,
    pub vertical_aperture: f32,
    /// (near, far)
    pub clipping_range: (f32, f32),
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            projection: Projection::Perspective,
            focal_length: 50.0,
            horizontal_aperture: 20.955,
            vertical_aperture: 15.2908,
            clipping_range: (1.0, 1_000_000.0),
        }
    }
}

impl CameraData {
    /// Read a `Camera` prim; unauthored attributes keep the schema defaults.
    pub fn from_prim(prim: &ComposedPrim) -> Option<Self> {
        if !prim.is_a("Camera") {
            return None;
        }
        let mut camera = CameraData::default();
        let float = |name: &str| prim.value(name).and_then(Value::as_f32);
        if prim.value("projection").and_then(Value::as_str) == Some("orthographic") {
            camera.projection = Projection::Orthographic;
        }
        camera.focal_length = float("focalLength").unwrap_or(camera.focal_length);
        camera.horizontal_aperture = float("horizontalAperture").unwrap_or(camera.horizontal_aperture);
        camera.vertical_aperture = float("verticalAperture").unwrap_or(camera.vertical_aperture);
        if let Some(range) = prim.value("clippingRange").and_then(Value::as_vec2) {
            camera.clipping_range = (range.x, range.y);
        }
        Some(camera)
    }

    /// Vertical field of view in radians.
    pub fn fov_y(&self) -> f32 {
        2.0 * (self.vertical_aperture / (2.0 * self.focal_length)).atan()
    }

    pub fn aspect(&self) -> f32 {
        self.horizontal_aperture / self.vertical_aperture
    }

    pub fn write_to(&self, spec: &mut PrimSpec) {
        spec.set_attribute(
            Attribute::new("projection", "token")
                .with_value(Value::Token(self.projection.as_token().to_string())),
        );
        spec.set_attribute(
            Attribute::new("focalLength", "float").with_value(Value::from_f32(self.focal_length)),
        );
        spec.set_attribute(
            Attribute::new("horizontalAperture", "float")
                .with_value(Value::from_f32(self.horizontal_aperture)),
        );
        spec.set_attribute(
            Attribute::new("verticalAperture", "float")
                .with_value(Value::from_f32(self.vertical_aperture)),
        );
        let (near, far) = self.clipping_range;
        spec.set_attribute(
            Attribute::new("clippingRange", "float2")
                .with_value(Value::from_vec2(remix_math::Vec2::new(near, far))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::Stage;

    #[test]
    fn test_read_capture_camera() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.usda");
        std::fs::write(
            &path,
            r#"#usda 1.0
def Xform "RootNode"
{
    def Camera "Camera"
    {
        float focalLength = 18.1
        float horizontalAperture = 36
        float verticalAperture = 20.25
        float2 clippingRange = (0.5, 5000)
    }

    def Xform "notACamera"
    {
    }
}
"#,
        )
        .unwrap();
        let stage = Stage::open(&path).unwrap();
        let camera = CameraData::from_prim(stage.prim("/RootNode/Camera").unwrap()).unwrap();
        assert_eq!(camera.projection, Projection::Perspective);
        assert_eq!(camera.focal_length, 18.1);
        assert_eq!(camera.clipping_range, (0.5, 5000.0));
        assert!((camera.aspect() - 16.0 / 9.0).abs() < 1e-6);
        assert!(CameraData::from_prim(stage.prim("/RootNode/notACamera").unwrap()).is_none());
    }

    #[test]
    fn test_fov_from_apertures() {
        let camera = CameraData {
            focal_length: 10.0,
            vertical_aperture: 20.0,
            ..Default::default()
        };
        assert!((camera.fov_y() - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }
}
