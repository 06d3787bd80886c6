//! Scenario tests driving the resource layer the way the renderer does,
//! against the in-memory device.

use std::sync::Arc;

use cobble_render::{
    BufferUsages, GpuError, IndexFormat, NullDevice, RenderContext, RenderTarget, TextureFormat,
    VertexFormat, VertexFormatElement, VertexType,
};

fn setup() -> (Arc<NullDevice>, Arc<RenderContext>) {
    let device = Arc::new(NullDevice::new(16384));
    let ctx = Arc::new(RenderContext::new(device.clone()).unwrap());
    (device, ctx)
}

#[test]
fn position_color_format_lays_out_as_expected() {
    let format = VertexFormat::builder()
        .element("position", VertexFormatElement::new(0, VertexType::Float, 3))
        .element("color", VertexFormatElement::new(1, VertexType::UByte, 4))
        .build();

    assert_eq!(format.stride(), 16);
    assert_eq!(
        format.offset_of(&VertexFormatElement::new(0, VertexType::Float, 3)),
        Ok(0)
    );
    assert_eq!(
        format.offset_of(&VertexFormatElement::new(1, VertexType::UByte, 4)),
        Ok(12)
    );
}

#[test]
fn depth_render_target_against_a_16k_device() {
    let (_, ctx) = setup();
    let mut target = RenderTarget::new(ctx, "world", true);

    target.create_buffers(256, 256).unwrap();
    let depth = target.depth_texture().expect("depth texture allocated");
    assert_eq!(depth.format(), TextureFormat::Depth32);
    assert_eq!(depth.width_at(0), 256);
    assert_eq!(depth.height_at(0), 256);
    assert!(target.depth_texture_view().is_some());

    let err = target.create_buffers(20000, 20000).unwrap_err();
    assert!(matches!(err, GpuError::UnsupportedSize { .. }));
    let message = err.to_string();
    assert!(message.contains("20000") && message.contains("16384"), "{message}");
}

#[test]
fn a_frame_of_immediate_geometry() {
    let (device, ctx) = setup();

    let mut target = RenderTarget::new(ctx.clone(), "world", true);
    target.create_buffers(640, 360).unwrap();

    // GUI code rebuilds its quads every frame.
    let mut format = VertexFormat::builder()
        .element("position", VertexFormatElement::POSITION)
        .element("color", VertexFormatElement::COLOR)
        .build();
    let vertices = vec![0u8; 4 * format.stride() as usize];
    let indices: &[u8] = &[0, 0, 1, 0, 2, 0, 2, 0, 3, 0, 0, 0];
    format.upload_immediate_vertices(&ctx, &vertices).unwrap();
    format.upload_immediate_indices(&ctx, indices).unwrap();

    {
        let mut encoder = ctx.device().create_command_encoder();
        let mut pass = encoder.begin_render_pass(
            "gui",
            target.color_texture_view().unwrap(),
            target.depth_texture_view(),
        );
        pass.set_pipeline("gui/quads");
        pass.set_vertex_buffer(0, format.immediate_vertex_buffer().unwrap());
        pass.set_index_buffer(format.immediate_index_buffer().unwrap(), IndexFormat::Uint16);
        pass.draw_indexed(0, 0, 6, 1);
    }

    target.blit_to_screen().unwrap();

    let stats = device.stats();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.presents, 1);

    format.close();
    target.destroy_buffers();
    ctx.close();
}

#[test]
fn allocation_failure_propagates_and_degrades() {
    let (device, ctx) = setup();
    let mut target = RenderTarget::new(ctx, "world", true);

    // The color allocation succeeds but the depth allocation fails; the
    // target must end up fully unallocated, and the caller can simply retry.
    device.fail_allocation_in(1);
    let before = device.stats();
    let err = target.create_buffers(128, 128).unwrap_err();
    assert!(matches!(err, GpuError::OutOfDeviceMemory));
    assert!(target.color_texture().is_none());
    assert!(target.depth_texture().is_none());
    let after = device.stats();
    assert_eq!(after.textures_created, before.textures_created + 1);
    assert_eq!(after.textures_destroyed, before.textures_destroyed + 1);

    target.create_buffers(128, 128).unwrap();
    assert!(target.color_texture().is_some());
    assert!(target.depth_texture().is_some());
}

#[test]
fn growing_an_immediate_buffer_closes_the_old_one() {
    let (device, ctx) = setup();
    let mut format = VertexFormat::builder()
        .element("position", VertexFormatElement::POSITION)
        .build();

    format.upload_immediate_vertices(&ctx, &[1; 32]).unwrap();
    let before = device.stats();
    format.upload_immediate_vertices(&ctx, &[2; 64]).unwrap();
    let after = device.stats();

    assert_eq!(after.buffers_created, before.buffers_created + 1);
    assert_eq!(after.buffers_destroyed, before.buffers_destroyed + 1);
    assert_eq!(device.buffer_contents(format.immediate_vertex_buffer().unwrap()), vec![2; 64]);
}

#[test]
fn uniform_ring_rotation_is_per_frame() {
    let (_, ctx) = setup();
    let mut ring = cobble_render::MappableRingBuffer::new(
        &**ctx.device(),
        "fog uniforms",
        BufferUsages::UNIFORM | BufferUsages::COPY_DST | BufferUsages::MAP_WRITE,
        256,
        2,
    )
    .unwrap();

    // Two frames in flight alternate between the two buffers.
    let frame_a = ring.current().raw().id();
    let frame_b = ring.rotate().raw().id();
    assert_ne!(frame_a, frame_b);
    assert_eq!(ring.rotate().raw().id(), frame_a);

    ring.close();
}
