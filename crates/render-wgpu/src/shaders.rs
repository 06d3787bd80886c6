//! The WGSL sources built into the backend.

/// Samples a texture over a full-screen quad.
///
/// Used both to composite offscreen render targets (with premultiplied-alpha
/// blending) and to present a color attachment to the swap chain (with
/// blending disabled).
pub const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var color_texture: texture_2d<f32>;
@group(0) @binding(1) var color_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) corner: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(corner, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x * 0.5 + 0.5, 0.5 - corner.y * 0.5);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(color_texture, color_sampler, in.uv);
}
"#;
