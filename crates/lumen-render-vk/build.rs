// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

use anyhow::{Context, Result};

// Triangle positions and colors live in the vertex shader; there is no
// vertex input.
const VERT: &str = r#"
#version 450
layout(location = 0) out vec3 vColor;

const vec2 positions[3] = vec2[](
    vec2( 0.0, -0.5),
    vec2( 0.5,  0.5),
    vec2(-0.5,  0.5)
);
const vec3 colors[3] = vec3[](
    vec3(1.0, 0.0, 0.0),
    vec3(0.0, 1.0, 0.0),
    vec3(0.0, 0.0, 1.0)
);

void main() {
    gl_Position = vec4(positions[gl_VertexIndex], 0.0, 1.0);
    vColor = colors[gl_VertexIndex];
}
"#;

const FRAG: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

fn main() -> Result<()> {
    let out = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR")?);

    let compiler = shaderc::Compiler::new().context("shaderc compiler")?;
    let mut opts = shaderc::CompileOptions::new().context("shaderc options")?;
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (VERT, shaderc::ShaderKind::Vertex, "tri.vert"),
        (FRAG, shaderc::ShaderKind::Fragment, "tri.frag"),
    ] {
        let spv = compiler
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .with_context(|| format!("compile {name}"))?;
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .with_context(|| format!("write {name}.spv"))?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
