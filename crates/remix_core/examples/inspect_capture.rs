//! Example: Read a Remix capture and summarize it.
//!
//! Run with: cargo run --example inspect_capture -- captures/capture.usda

use std::env;
use std::path::Path;

use remix_core::reader::{read_scene, ReadOptions};
use remix_core::{PrimKind, Severity};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: inspect_capture <path-to-capture.usda>");
        println!("\nExamples:");
        println!("  cargo run --example inspect_capture -- captures/capture.usda");
        println!("  cargo run --example inspect_capture -- mod.usda");
        return;
    }

    let path = Path::new(&args[1]);
    println!("Reading capture: {}", path.display());

    match read_scene(path, &ReadOptions::default()) {
        Ok(report) => {
            let scene = &report.scene;
            println!("\n=== Scene: {} ===", scene.name);
            println!("Up axis: {}", scene.up_axis.as_token());
            println!("Meters per unit: {}", scene.meters_per_unit);
            println!("Layers: {}", scene.layers.len());
            println!("Prims: {}", scene.prim_count());
            println!("Meshes: {}", scene.mesh_count());

            println!("\n--- Meshes ---");
            scene.walk(|prim| {
                let Some(mesh) = &prim.mesh else {
                    return;
                };
                println!(
                    "  {} - {} points, {} faces, {} UV sets{}",
                    prim.path,
                    mesh.positions.len(),
                    mesh.face_count(),
                    mesh.uv_sets.len(),
                    if mesh.is_skinned() { " (skinned)" } else { "" }
                );
                if let Some(binding) = &prim.material_binding {
                    println!(
                        "       Material: {}{}",
                        binding.material_path,
                        if binding.broken { " (missing)" } else { "" }
                    );
                }
            });

            println!("\n--- Materials ---");
            scene.walk(|prim| {
                if prim.kind != PrimKind::Material {
                    return;
                }
                if let Some(material) = &prim.material {
                    println!(
                        "  {} - {:?}, {} textures{}",
                        prim.path,
                        material.opacity_mode(),
                        material.textures().len(),
                        if material.unrecognized { " (unrecognized shader)" } else { "" }
                    );
                }
            });

            println!("\n--- Diagnostics ({:?}) ---", report.status());
            for diagnostic in &report.diagnostics {
                let marker = match diagnostic.severity {
                    Severity::Info => "info",
                    Severity::Warning => "warn",
                    Severity::Error => "error",
                };
                println!(
                    "  [{}] {}: {}",
                    marker, diagnostic.subject, diagnostic.message
                );
            }
        }
        Err(e) => {
            eprintln!("Error reading capture: {}", e);
        }
    }
}
