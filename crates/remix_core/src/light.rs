//! UsdLux lights.
//!
//! Remix captures place game lights under `/RootNode/lights` as sphere,
//! disk, rect, cylinder, distant or dome lights. Parameters are read from
//! `inputs:*` attributes, falling back to the pre-connectable names without
//! the prefix. A sphere light with `ShapingAPI` and a cone narrower than
//! [`SPOT_CONE_LIMIT`] degrees is a spot light.

use remix_math::Vec3;
use serde::{Deserialize, Serialize};

use crate::usd::{Attribute, ComposedPrim, PrimSpec, Value};

/// Cone angles at or above this many degrees light the whole sphere.
pub const SPOT_CONE_LIMIT: f32 = 179.0;

/// Half-size of the extent authored around sphere lights.
const SPHERE_EXTENT: f32 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightShape {
    Sphere,
    Disk,
    Rect,
    Cylinder,
    Distant,
    Dome,
}

impl LightShape {
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        match type_name {
            "SphereLight" => Some(LightShape::Sphere),
            "DiskLight" => Some(LightShape::Disk),
            "RectLight" => Some(LightShape::Rect),
            "CylinderLight" => Some(LightShape::Cylinder),
            "DistantLight" => Some(LightShape::Distant),
            "DomeLight" => Some(LightShape::Dome),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LightShape::Sphere => "SphereLight",
            LightShape::Disk => "DiskLight",
            LightShape::Rect => "RectLight",
            LightShape::Cylinder => "CylinderLight",
            LightShape::Distant => "DistantLight",
            LightShape::Dome => "DomeLight",
        }
    }
}

/// `ShapingAPI` cone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shaping {
    /// Degrees
    pub cone_angle: f32,
    pub cone_softness: f32,
    pub focus: f32,
}

impl Default for Shaping {
    fn default() -> Self {
        Self {
            cone_angle: 180.0,
            cone_softness: 0.0,
            focus: 0.0,
        }
    }
}

/// A light prim's parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightData {
    pub shape: LightShape,
    pub intensity: f32,
    pub exposure: f32,
    pub color: Vec3,
    /// Kelvin, when `enableColorTemperature` is on
    pub color_temperature: Option<f32>,
    pub radius: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub length: Option<f32>,
    /// Angular diameter of a distant light, degrees
    pub angle: Option<f32>,
    pub shaping: Option<Shaping>,
}

impl LightData {
    pub fn new(shape: LightShape) -> Self {
        Self {
            shape,
            intensity: 1.0,
            exposure: 0.0,
            color: Vec3::ONE,
            color_temperature: None,
            radius: None,
            width: None,
            height: None,
            length: None,
            angle: None,
            shaping: None,
        }
    }

    /// Read a light prim. `None` when the prim is not a known light type.
    pub fn from_prim(prim: &ComposedPrim) -> Option<Self> {
        let shape = LightShape::from_type_name(prim.type_name.as_deref()?)?;
        let input = |name: &str| {
            prim.value(&format!("inputs:{}", name))
                .or_else(|| prim.value(name))
        };
        let float = |name: &str| input(name).and_then(Value::as_f32);

        let mut light = LightData::new(shape);
        light.intensity = float("intensity").unwrap_or(light.intensity);
        light.exposure = float("exposure").unwrap_or(light.exposure);
        light.color = input("color").and_then(Value::as_vec3).unwrap_or(light.color);
        if input("enableColorTemperature").and_then(Value::as_bool) == Some(true) {
            light.color_temperature = Some(float("colorTemperature").unwrap_or(6500.0));
        }
        light.radius = float("radius");
        light.width = float("width");
        light.height = float("height");
        light.length = float("length");
        light.angle = float("angle");

        let has_shaping_api = prim.api_schemas().iter().any(|s| s == "ShapingAPI");
        let cone_angle = float("shaping:cone:angle");
        if has_shaping_api || cone_angle.is_some() {
            let defaults = Shaping::default();
            light.shaping = Some(Shaping {
                cone_angle: cone_angle.unwrap_or(defaults.cone_angle),
                cone_softness: float("shaping:cone:softness").unwrap_or(defaults.cone_softness),
                focus: float("shaping:focus").unwrap_or(defaults.focus),
            });
        }
        Some(light)
    }

    /// Emitted power: `intensity * 2^exposure`.
    pub fn power(&self) -> f32 {
        self.intensity * self.exposure.exp2()
    }

    pub fn is_spot(&self) -> bool {
        self.shape == LightShape::Sphere
            && self
                .shaping
                .as_ref()
                .is_some_and(|s| s.cone_angle < SPOT_CONE_LIMIT)
    }

    /// Bounds in the light's local space. Distant and dome lights have none.
    pub fn extent(&self) -> Option<(Vec3, Vec3)> {
        let radius = self.radius.unwrap_or(0.5);
        let half = match self.shape {
            LightShape::Sphere => Vec3::splat(SPHERE_EXTENT.max(radius)),
            LightShape::Disk => Vec3::new(radius, radius, 0.0),
            LightShape::Rect => Vec3::new(
                self.width.unwrap_or(1.0) * 0.5,
                self.height.unwrap_or(1.0) * 0.5,
                0.0,
            ),
            LightShape::Cylinder => Vec3::new(self.length.unwrap_or(1.0) * 0.5, radius, radius),
            LightShape::Distant | LightShape::Dome => return None,
        };
        Some((-half, half))
    }

    /// Replace the light parameters authored on `spec`. Other inputs, such
    /// as a dome light's texture, stay.
    pub fn write_to(&self, spec: &mut PrimSpec) {
        spec.properties.retain(|p| !is_owned(p.name()));

        let float = |name: &str, value: f32| {
            Attribute::new(format!("inputs:{}", name), "float").with_value(Value::from_f32(value))
        };
        spec.set_attribute(float("intensity", self.intensity));
        if self.exposure != 0.0 {
            spec.set_attribute(float("exposure", self.exposure));
        }
        spec.set_attribute(
            Attribute::new("inputs:color", "color3f").with_value(Value::from_vec3(self.color)),
        );
        spec.set_attribute(
            Attribute::new("inputs:enableColorTemperature", "bool")
                .with_value(Value::Bool(self.color_temperature.is_some())),
        );
        if let Some(kelvin) = self.color_temperature {
            spec.set_attribute(float("colorTemperature", kelvin));
        }
        let sizes = [
            ("radius", self.radius),
            ("width", self.width),
            ("height", self.height),
            ("length", self.length),
            ("angle", self.angle),
        ];
        for (name, value) in sizes {
            if let Some(value) = value {
                spec.set_attribute(float(name, value));
            }
        }
        if let Some(shaping) = &self.shaping {
            spec.add_api_schema("ShapingAPI");
            spec.set_attribute(float("shaping:cone:angle", shaping.cone_angle));
            spec.set_attribute(float("shaping:cone:softness", shaping.cone_softness));
            spec.set_attribute(float("shaping:focus", shaping.focus));
        }
        if let Some((min, max)) = self.extent() {
            spec.set_attribute(
                Attribute::new("extent", "float3[]").with_value(Value::from_vec3_array(&[min, max])),
            );
        }
    }
}

const OWNED_INPUTS: [&str; 12] = [
    "intensity",
    "exposure",
    "color",
    "enableColorTemperature",
    "colorTemperature",
    "radius",
    "width",
    "height",
    "length",
    "angle",
    "shaping:cone:angle",
    "shaping:cone:softness",
];

fn is_owned(name: &str) -> bool {
    let bare = name.strip_prefix("inputs:").unwrap_or(name);
    name == "extent" || bare == "shaping:focus" || OWNED_INPUTS.contains(&bare)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::{parse_usda, Specifier, Stage};

    const LIGHTS: &str = r#"#usda 1.0
def Xform "RootNode"
{
    def Scope "lights"
    {
        def SphereLight "light_spot" (
            prepend apiSchemas = ["ShapingAPI"]
        )
        {
            float inputs:intensity = 200
            float inputs:exposure = 1
            color3f inputs:color = (1, 0.5, 0.25)
            float inputs:radius = 2
            float inputs:shaping:cone:angle = 30
            float inputs:shaping:cone:softness = 0.2
        }

        def SphereLight "light_point" (
            prepend apiSchemas = ["ShapingAPI"]
        )
        {
            float intensity = 50
            float inputs:shaping:cone:angle = 180
        }

        def DistantLight "sun"
        {
            float inputs:angle = 0.53
            bool inputs:enableColorTemperature = true
            float inputs:colorTemperature = 5000
        }
    }
}
"#;

    fn stage(dir: &std::path::Path) -> Stage {
        let path = dir.join("lights.usda");
        std::fs::write(&path, LIGHTS).unwrap();
        Stage::open(&path).unwrap()
    }

    #[test]
    fn test_read_spot_light() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage(dir.path());
        let light = LightData::from_prim(stage.prim("/RootNode/lights/light_spot").unwrap()).unwrap();
        assert_eq!(light.shape, LightShape::Sphere);
        assert_eq!(light.power(), 400.0);
        assert_eq!(light.color, Vec3::new(1.0, 0.5, 0.25));
        assert_eq!(light.radius, Some(2.0));
        assert!(light.is_spot());
        assert_eq!(light.shaping.unwrap().cone_softness, 0.2);
    }

    #[test]
    fn test_wide_cone_is_point_light() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage(dir.path());
        let light = LightData::from_prim(stage.prim("/RootNode/lights/light_point").unwrap()).unwrap();
        // Unprefixed names are still read
        assert_eq!(light.intensity, 50.0);
        assert!(light.shaping.is_some());
        assert!(!light.is_spot());
    }

    #[test]
    fn test_distant_light_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage(dir.path());
        let sun = LightData::from_prim(stage.prim("/RootNode/lights/sun").unwrap()).unwrap();
        assert_eq!(sun.shape, LightShape::Distant);
        assert_eq!(sun.angle, Some(0.53));
        assert_eq!(sun.color_temperature, Some(5000.0));
        assert_eq!(sun.extent(), None);
        assert!(LightData::from_prim(stage.prim("/RootNode/lights").unwrap()).is_none());
    }

    #[test]
    fn test_write_replaces_owned_inputs() {
        let layer = parse_usda(
            r#"#usda 1.0
def DomeLight "sky"
{
    float intensity = 3
    asset inputs:texture:file = @./sky.dds@
}
"#,
        )
        .unwrap();
        let mut spec = layer.prims[0].clone();
        let mut light = LightData::new(LightShape::Dome);
        light.intensity = 7.5;
        light.write_to(&mut spec);

        assert!(spec.attribute("intensity").is_none());
        assert_eq!(
            spec.attribute("inputs:intensity").and_then(Attribute::value),
            Some(&Value::from_f32(7.5))
        );
        assert!(spec.attribute("inputs:texture:file").is_some());
        assert!(spec.attribute("extent").is_none());
        assert_eq!(spec.specifier, Specifier::Def);
    }

    #[test]
    fn test_rect_extent() {
        let mut light = LightData::new(LightShape::Rect);
        light.width = Some(4.0);
        light.height = Some(2.0);
        assert_eq!(
            light.extent(),
            Some((Vec3::new(-2.0, -1.0, 0.0), Vec3::new(2.0, 1.0, 0.0)))
        );
    }
}
