use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    let dest = env::var("OUT_DIR").unwrap();

    // ========================================================================
    // SPIR-V Shader Compilation (via glslc from Vulkan SDK)
    // ========================================================================
    let shader_dir = Path::new("shaders");

    let glslc = match find_glslc() {
        Some(path) => path,
        None => {
            panic!(
                "glslc not found. Install the Vulkan SDK to compile shaders.\n\
                 Download from: https://vulkan.lunarg.com/sdk/home\n\
                 Ensure VULKAN_SDK is set or glslc is on PATH."
            );
        }
    };

    println!("cargo:warning=Using glslc: {}", glslc.display());

    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).unwrap();

    // (source, output, stage, defines)
    let shaders: [(&str, &str, &str, &[&str]); 7] = [
        ("scene.vert.glsl", "scene.vert.spv", "vertex", &[]),
        ("scene.frag.glsl", "scene.frag.spv", "fragment", &[]),
        ("scaled_copy.comp.glsl", "scaled_copy.comp.spv", "compute", &[]),
        // Same program writing the rgba8 present image.
        ("scaled_copy.comp.glsl", "present_copy.comp.spv", "compute", &["PRESENT_OUTPUT"]),
        ("cas.comp.glsl", "cas.comp.spv", "compute", &[]),
        ("cb_resolve.comp.glsl", "cb_resolve.comp.spv", "compute", &[]),
        ("image_delta.comp.glsl", "image_delta.comp.spv", "compute", &[]),
    ];

    let mut any_failed = false;

    for (filename, spv_name, stage, defines) in &shaders {
        let src_path = shader_dir.join(filename);
        let spv_path = spirv_dir.join(spv_name);

        any_failed |= !compile_shader(&glslc, &src_path, &spv_path, stage, defines, filename);
        println!("cargo:rerun-if-changed=shaders/{filename}");
    }

    if any_failed {
        panic!("Some shaders failed to compile (see warnings above)");
    }
}

/// Compile a single shader file to SPIR-V.
fn compile_shader(
    glslc: &Path,
    src_path: &Path,
    spv_path: &Path,
    stage: &str,
    defines: &[&str],
    filename: &str,
) -> bool {
    let output = Command::new(glslc)
        .arg(format!("-fshader-stage={stage}"))
        .args(defines.iter().map(|d| format!("-D{d}")))
        .args(["--target-env=vulkan1.3", "-O", "-o"])
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            if result.status.success() {
                if !stderr.is_empty() {
                    println!("cargo:warning=glslc {filename}: {stderr}");
                }
                true
            } else {
                println!("cargo:warning=glslc FAILED {filename}: {stderr}");
                false
            }
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {filename}: {e}");
            false
        }
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK.
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        for candidate in [
            PathBuf::from(&sdk).join("Bin").join("glslc.exe"),
            PathBuf::from(&sdk).join("bin").join("glslc"),
        ] {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
