// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

fn main() {
    let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    // Workspace-level shaders/, where the default RenderSettings paths point.
    let shader_dir = manifest.join("../../shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let stages = [
        ("shader.vert", shaderc::ShaderKind::Vertex, "vert.spv"),
        ("shader.frag", shaderc::ShaderKind::Fragment, "frag.spv"),
    ];
    for (source, kind, output) in stages {
        let src_path = shader_dir.join(source);
        println!("cargo:rerun-if-changed={}", src_path.display());

        let glsl = fs::read_to_string(&src_path)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", src_path.display()));
        let spv = comp
            .compile_into_spirv(&glsl, kind, source, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("failed to compile {source}: {e}"));
        fs::write(shader_dir.join(output), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rerun-if-changed=build.rs");
}
