//! Compiles `shaders/*.{vert,frag}` to SPIR-V in `OUT_DIR`.

use shaderc::{CompileOptions, Compiler, EnvVersion, OptimizationLevel, ShaderKind, SpirvVersion, TargetEnv};
use std::path::{Path, PathBuf};
use std::{env, fs};

const SHADERS: [(&str, ShaderKind); 2] = [
    ("fullscreen.vert", ShaderKind::Vertex),
    ("sparse_fetch.frag", ShaderKind::Fragment),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let compiler = Compiler::new().expect("shaderc compiler");
    let mut options = CompileOptions::new().expect("shaderc options");
    options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_3 as u32);
    options.set_target_spirv(SpirvVersion::V1_6);
    options.set_optimization_level(OptimizationLevel::Performance);

    for (name, kind) in SHADERS {
        let input = Path::new("shaders").join(name);
        let source = fs::read_to_string(&input)
            .unwrap_or_else(|e| panic!("reading {}: {e}", input.display()));

        let artifact = compiler
            .compile_into_spirv(&source, kind, name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
        if artifact.get_num_warnings() > 0 {
            println!("cargo:warning={name}: {}", artifact.get_warning_messages());
        }

        // fullscreen.vert -> fullscreen_vert.spv
        let output = out_dir.join(format!("{}.spv", name.replace('.', "_")));
        fs::write(&output, artifact.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {}: {e}", output.display()));
    }
}
