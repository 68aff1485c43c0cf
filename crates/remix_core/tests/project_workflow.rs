//! End-to-end: read a capture through a project, edit, export into a
//! replacement layer.

use std::path::{Path, PathBuf};

use remix_core::usd::{read_layer, Attribute, Property, StageOptions};
use remix_core::{
    CancellationToken, ErrorKind, LayerManager, OperationStatus, ProjectSession, ProjectState, SessionConfig,
};
use remix_math::{Mat4, Vec3};

const CAPTURE: &str = r#"#usda 1.0
(
    defaultPrim = "RootNode"
    upAxis = "Z"
)

def Xform "RootNode"
{
    def Scope "meshes"
    {
        def Mesh "mesh_0AB1" (
            prepend apiSchemas = ["MaterialBindingAPI"]
        )
        {
            float3[] points = [(0, 0, 0), (1, 0, 0), (1, 1, 0), (0, 1, 0)]
            int[] faceVertexCounts = [4]
            int[] faceVertexIndices = [0, 1, 2, 3]
            rel material:binding = </RootNode/Looks/mat_0AB1>
        }

        def Mesh "mesh_0AB2" (
            prepend apiSchemas = ["MaterialBindingAPI"]
        )
        {
            float3[] points = [(0, 0, 0), (1, 0, 0), (1, 1, 0)]
            int[] faceVertexCounts = [3]
            int[] faceVertexIndices = [0, 1, 2]
            rel material:binding = </RootNode/Looks/mat_gone>
        }
    }

    def Scope "Looks"
    {
        def Material "mat_0AB1"
        {
            token outputs:mdl:displacement.connect = </RootNode/Looks/mat_0AB1/Shader.outputs:out>
            token outputs:mdl:surface.connect = </RootNode/Looks/mat_0AB1/Shader.outputs:out>
            token outputs:mdl:volume.connect = </RootNode/Looks/mat_0AB1/Shader.outputs:out>

            def Shader "Shader"
            {
                uniform token info:implementationSource = "sourceAsset"
                uniform asset info:mdl:sourceAsset = @AperturePBR_Opacity.mdl@
                uniform token info:mdl:sourceAsset:subIdentifier = "AperturePBR_Opacity"
                asset inputs:diffuse_texture = @./textures/0AB1.dds@ (
                    colorSpace = "auto"
                )
                float inputs:reflection_roughness_constant = 0.7
                int inputs:filter_mode = 1
                float inputs:sprite_sheet_fps = 12
                token outputs:out
            }
        }
    }
}
"#;

fn write(path: &Path, text: &str) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
    path.to_path_buf()
}

/// A project whose root sublayers two replacement layers and the capture.
fn setup(dir: &Path) -> (ProjectSession, PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let capture = write(&dir.join("captures/capture.usda"), CAPTURE);
    let root = dir.join("project/mod.usda");
    LayerManager::new()
        .create_project(&root, Some("Test Game"))
        .unwrap();
    let session = ProjectSession::open_with(&root, SessionConfig::default(), None).unwrap();

    session
        .edit_layers(|m| {
            m.create_sublayer("a", None)?;
            m.create_sublayer("b", None)?;
            m.add_sublayer(Path::new("../captures/capture.usda"), None)?;
            m.set_target_layer("subUSDAs/b.usda")?;
            m.flush()
        })
        .unwrap();
    (session, capture)
}

fn shader_inputs(path: &Path, shader: &str) -> Vec<Attribute> {
    let layer = read_layer(path, &StageOptions::default()).unwrap();
    layer
        .prim(shader)
        .unwrap()
        .properties
        .iter()
        .filter_map(|p| match p {
            Property::Attribute(a) if a.name.starts_with("inputs:") => Some(a.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_missing_material_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _) = setup(dir.path());

    let report = session.read_project().unwrap();
    assert_eq!(report.status(), OperationStatus::PartialSuccess);
    let scene = &report.scene;
    assert!(scene.find_prim("/RootNode/meshes/mesh_0AB1").is_some());
    let broken = scene.find_prim("/RootNode/meshes/mesh_0AB2").unwrap();
    assert!(broken.has_broken_binding());
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.kind == ErrorKind::BrokenReference && d.subject == broken.path));
}

#[test]
fn test_export_only_touches_target_layer() {
    let dir = tempfile::tempdir().unwrap();
    let (session, capture) = setup(dir.path());
    let root = dir.path().join("project/mod.usda");
    let layer_a = dir.path().join("project/subUSDAs/a.usda");
    let layer_b = dir.path().join("project/subUSDAs/b.usda");
    let before: Vec<Vec<u8>> = [&capture, &root, &layer_a]
        .iter()
        .map(|p| std::fs::read(p).unwrap())
        .collect();

    let mut scene = session.read_project().unwrap().scene;
    let mesh = scene.find_prim_mut("/RootNode/meshes/mesh_0AB1").unwrap();
    mesh.transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 3.0));

    let report = session.export(&scene, &CancellationToken::new(), None).unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(session.state(), ProjectState::Dirty);

    let after: Vec<Vec<u8>> = [&capture, &root, &layer_a]
        .iter()
        .map(|p| std::fs::read(p).unwrap())
        .collect();
    assert_eq!(before, after);

    let written = read_layer(&layer_b, &StageOptions::default()).unwrap();
    let mesh = written.prim("/RootNode/meshes/mesh_0AB1").unwrap();
    assert_eq!(mesh.specifier, remix_core::usd::Specifier::Over);
    assert!(mesh.attribute("xformOp:transform").is_some());
    // The triangulated quad is what gets written
    let counts = mesh.attribute("faceVertexCounts").unwrap().value().unwrap();
    assert_eq!(counts.as_int_array().unwrap(), vec![3, 3]);
}

#[test]
fn test_unedited_material_exports_identical_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let (session, capture) = setup(dir.path());

    let scene = session.read_project().unwrap().scene;
    let report = session.export(&scene, &CancellationToken::new(), None).unwrap();
    let notes = report
        .material_notes
        .iter()
        .find(|n| n.material == "/RootNode/Looks/mat_0AB1")
        .unwrap();
    assert!(!notes.notes.is_empty());

    let shader = "/RootNode/Looks/mat_0AB1/Shader";
    let original = shader_inputs(&capture, shader);
    let exported = shader_inputs(&dir.path().join("project/subUSDAs/b.usda"), shader);
    assert_eq!(original, exported);
}

#[test]
fn test_reload_rejected_until_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _) = setup(dir.path());
    assert_eq!(session.state(), ProjectState::Saved);

    session.edit_layers(|m| m.move_sublayer("subUSDAs/b.usda", 0)).unwrap();
    let err = session.edit_layers(|m| m.reload()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Project);

    session.edit_layers(|m| m.discard()).unwrap();
    let order: Vec<String> = session.layers().into_iter().map(|l| l.id).collect();
    assert_eq!(
        order,
        ["root", "subUSDAs/a.usda", "subUSDAs/b.usda", "../captures/capture.usda"]
    );
    assert!(session.layers()[2].is_target);
}
