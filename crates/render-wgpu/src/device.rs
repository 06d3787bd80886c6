use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{mpsc, Arc};

use wgpu::util::DeviceExt;

use cobble_render::{
    AddressMode, BufferDescriptor, BufferUsages, Color, CommandEncoder, DeviceCapabilities,
    FilterMode, GpuBuffer, GpuBufferSlice, GpuDevice, GpuError, GpuTexture, GpuTextureView,
    IndexFormat, MappedBuffer, RawBuffer, RawTexture, RawTextureView, RenderPass, SamplerState,
    TextureDescriptor, TextureFormat, TextureUsages, BLIT_PIPELINE,
};

use crate::shaders;

/// A pipeline registered with the device, plus the bind-group indices of its
/// named resources.
struct RegisteredPipeline {
    pipeline: wgpu::RenderPipeline,
    /// Shader sampler name to bind-group index.
    samplers: HashMap<String, u32>,
    /// Uniform block name to bind-group index.
    uniforms: HashMap<String, u32>,
}

struct WgpuRawBuffer {
    id: u64,
    buffer: wgpu::Buffer,
}

impl RawBuffer for WgpuRawBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn destroy(&self) {
        self.buffer.destroy();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct WgpuRawTexture {
    id: u64,
    texture: wgpu::Texture,
}

impl RawTexture for WgpuRawTexture {
    fn id(&self) -> u64 {
        self.id
    }

    fn destroy(&self) {
        self.texture.destroy();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct WgpuRawTextureView {
    id: u64,
    view: wgpu::TextureView,
}

impl RawTextureView for WgpuRawTextureView {
    fn id(&self) -> u64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns the `wgpu` buffer behind `buffer`.
fn raw_buffer(buffer: &GpuBuffer) -> &wgpu::Buffer {
    match buffer.raw().as_any().downcast_ref::<WgpuRawBuffer>() {
        Some(raw) => &raw.buffer,
        None => panic!("buffer `{}` was not created by this backend", buffer.label()),
    }
}

/// Returns the `wgpu` texture behind `texture`.
fn raw_texture(texture: &GpuTexture) -> &wgpu::Texture {
    match texture.raw().as_any().downcast_ref::<WgpuRawTexture>() {
        Some(raw) => &raw.texture,
        None => panic!(
            "texture `{}` was not created by this backend",
            texture.label()
        ),
    }
}

/// Returns the `wgpu` view behind `view`.
fn raw_view(view: &GpuTextureView) -> &wgpu::TextureView {
    match view.raw().as_any().downcast_ref::<WgpuRawTextureView>() {
        Some(raw) => &raw.view,
        None => panic!(
            "a view of texture `{}` was not created by this backend",
            view.texture().label()
        ),
    }
}

/// Maps a resource-layer buffer usage mask to the `wgpu` equivalent.
///
/// `HINT_CLIENT_STORAGE` has no counterpart and is dropped; `UNIFORM_TEXEL`
/// binds through a plain uniform binding on this backend.
pub(crate) fn buffer_usages(usage: BufferUsages) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    for (ours, theirs) in [
        (BufferUsages::MAP_READ, wgpu::BufferUsages::MAP_READ),
        (BufferUsages::MAP_WRITE, wgpu::BufferUsages::MAP_WRITE),
        (BufferUsages::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsages::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsages::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsages::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsages::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsages::UNIFORM_TEXEL, wgpu::BufferUsages::UNIFORM),
    ] {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub(crate) fn texture_usages(usage: TextureUsages) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    for (ours, theirs) in [
        (TextureUsages::COPY_DST, wgpu::TextureUsages::COPY_DST),
        (TextureUsages::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (
            TextureUsages::TEXTURE_BINDING,
            wgpu::TextureUsages::TEXTURE_BINDING,
        ),
        (
            TextureUsages::RENDER_ATTACHMENT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        ),
    ] {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub(crate) fn texel_format(format: TextureFormat, stencil: bool) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Depth32 if stencil => wgpu::TextureFormat::Depth32FloatStencil8,
        TextureFormat::Depth32 => wgpu::TextureFormat::Depth32Float,
    }
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

/// The [`GpuDevice`] implementation backed by `wgpu`.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: Cell<u64>,
    capabilities: Cell<DeviceCapabilities>,
    pipelines: RefCell<HashMap<String, RegisteredPipeline>>,
    samplers: RefCell<HashMap<SamplerState, Arc<wgpu::Sampler>>>,
    /// Group layout for a `texture_2d` + `sampler` pair.
    sampler_layout: wgpu::BindGroupLayout,
    /// Group layout for a single uniform buffer binding.
    uniform_layout: wgpu::BindGroupLayout,
    /// The full-screen quad used by the present path.
    quad_vertices: wgpu::Buffer,
    quad_indices: wgpu::Buffer,
    /// The pipeline that blits onto the swap chain, once the surface format
    /// is known.
    presenter: RefCell<Option<wgpu::RenderPipeline>>,
    /// The swap-chain view of the frame currently being recorded.
    frame_view: RefCell<Option<wgpu::TextureView>>,
    /// Readback completions waiting for the GPU to catch up.
    completions: RefCell<Vec<(mpsc::Receiver<()>, Box<dyn FnOnce()>)>>,
}

impl WgpuDevice {
    /// Wraps an open `wgpu` device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let sampler_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sampler group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform group layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let quad_corners: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0];
        let quad_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("present quad vertices"),
            contents: bytemuck::cast_slice(&quad_corners),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let quad_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("present quad indices"),
            contents: bytemuck::cast_slice::<u16, u8>(&[0, 1, 2, 2, 3, 0]),
            usage: wgpu::BufferUsages::INDEX,
        });

        let this = Self {
            device,
            queue,
            next_id: Cell::new(1),
            capabilities: Cell::new(DeviceCapabilities::default()),
            pipelines: RefCell::new(HashMap::new()),
            samplers: RefCell::new(HashMap::new()),
            sampler_layout,
            uniform_layout,
            quad_vertices,
            quad_indices,
            presenter: RefCell::new(None),
            frame_view: RefCell::new(None),
            completions: RefCell::new(Vec::new()),
        };

        // Offscreen targets composite through this pipeline.
        let blit = this.build_blit_pipeline(
            wgpu::TextureFormat::Rgba8Unorm,
            Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        );
        this.register_pipeline(BLIT_PIPELINE, blit, &[("color_sampler", 0)], &[]);

        this
    }

    /// Overrides the capability flags reported to the resource layer.
    pub fn set_capabilities(&self, capabilities: DeviceCapabilities) {
        self.capabilities.set(capabilities);
    }

    /// Returns the underlying `wgpu` device, for pipeline construction.
    #[inline]
    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns the bind-group layout used by [`RenderPass::bind_sampler`].
    #[inline]
    pub fn sampler_layout(&self) -> &wgpu::BindGroupLayout {
        &self.sampler_layout
    }

    /// Returns the bind-group layout used by [`RenderPass::bind_uniform`].
    #[inline]
    pub fn uniform_layout(&self) -> &wgpu::BindGroupLayout {
        &self.uniform_layout
    }

    /// Registers `pipeline` under `name` for use with
    /// [`RenderPass::set_pipeline`].
    ///
    /// `sampler_groups` and `uniform_groups` name the pipeline's bindable
    /// resources and the bind-group index each one lives at; the groups must
    /// use [`sampler_layout`] and [`uniform_layout`] respectively.
    ///
    /// [`sampler_layout`]: WgpuDevice::sampler_layout
    /// [`uniform_layout`]: WgpuDevice::uniform_layout
    pub fn register_pipeline(
        &self,
        name: &str,
        pipeline: wgpu::RenderPipeline,
        sampler_groups: &[(&str, u32)],
        uniform_groups: &[(&str, u32)],
    ) {
        let registered = RegisteredPipeline {
            pipeline,
            samplers: sampler_groups
                .iter()
                .map(|&(name, group)| (name.to_owned(), group))
                .collect(),
            uniforms: uniform_groups
                .iter()
                .map(|&(name, group)| (name.to_owned(), group))
                .collect(),
        };
        self.pipelines
            .borrow_mut()
            .insert(name.to_owned(), registered);
    }

    /// Installs the pipeline used to present onto a surface of the given
    /// format. Called by the surface once its format is known.
    pub(crate) fn install_presenter(&self, format: wgpu::TextureFormat) {
        *self.presenter.borrow_mut() = Some(self.build_blit_pipeline(format, None));
    }

    /// Installs the swap-chain view subsequent [`present_texture`] calls
    /// target, or clears it at the end of the frame.
    ///
    /// [`present_texture`]: CommandEncoder::present_texture
    pub(crate) fn set_frame_view(&self, view: Option<wgpu::TextureView>) {
        *self.frame_view.borrow_mut() = view;
    }

    /// Invokes the completion callbacks whose GPU work has finished.
    ///
    /// The surface pumps this once per frame; headless users should call it
    /// after submitting work that records readbacks.
    pub fn process_completions(&self) {
        let mut completions = self.completions.borrow_mut();
        let mut i = 0;
        while i < completions.len() {
            if completions[i].0.try_recv().is_ok() {
                let (_, callback) = completions.swap_remove(i);
                callback();
            } else {
                i += 1;
            }
        }
    }

    fn build_blit_pipeline(
        &self,
        target: wgpu::TextureFormat,
        blend: Option<wgpu::BlendState>,
    ) -> wgpu::RenderPipeline {
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("blit shader"),
                source: wgpu::ShaderSource::Wgsl(shaders::BLIT_SHADER.into()),
            });

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("blit pipeline layout"),
                bind_group_layouts: &[&self.sampler_layout],
                push_constant_ranges: &[],
            });

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: 8,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Runs `create` under an out-of-memory error scope.
    fn guard_allocation<T>(&self, create: impl FnOnce() -> T) -> Result<T, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let resource = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(resource),
            Some(_) => Err(GpuError::OutOfDeviceMemory),
        }
    }

    fn sampler(&self, state: SamplerState) -> Arc<wgpu::Sampler> {
        self.samplers
            .borrow_mut()
            .entry(state)
            .or_insert_with(|| {
                Arc::new(self.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("cached sampler"),
                    address_mode_u: address_mode(state.address_mode_u),
                    address_mode_v: address_mode(state.address_mode_v),
                    min_filter: filter_mode(state.min_filter),
                    mag_filter: filter_mode(state.mag_filter),
                    mipmap_filter: if state.use_mipmaps {
                        filter_mode(state.min_filter)
                    } else {
                        wgpu::FilterMode::Nearest
                    },
                    lod_max_clamp: if state.use_mipmaps { 32.0 } else { 0.0 },
                    ..Default::default()
                }))
            })
            .clone()
    }

    fn sampler_bind_group(&self, view: &GpuTextureView) -> wgpu::BindGroup {
        let sampler = self.sampler(view.texture().sampler());
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.sampler_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(raw_view(view)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        })
    }
}

fn require_open_buffer(buffer: &GpuBuffer) -> Result<(), GpuError> {
    if buffer.is_closed() {
        return Err(GpuError::Closed {
            label: buffer.label().to_owned(),
        });
    }
    Ok(())
}

fn require_buffer_usage(buffer: &GpuBuffer, usage: BufferUsages) -> Result<(), GpuError> {
    if !buffer.usage().contains(usage) {
        return Err(GpuError::MissingBufferUsage {
            label: buffer.label().to_owned(),
            missing: usage - buffer.usage(),
        });
    }
    Ok(())
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<GpuBuffer, GpuError> {
        let buffer = self.guard_allocation(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: desc.size,
                usage: buffer_usages(desc.usage),
                mapped_at_creation: false,
            })
        })?;

        let raw = WgpuRawBuffer {
            id: self.allocate_id(),
            buffer,
        };
        Ok(GpuBuffer::from_raw(
            Box::new(raw),
            desc.label,
            desc.usage,
            desc.size,
        ))
    }

    fn create_buffer_init(
        &self,
        label: &str,
        usage: BufferUsages,
        contents: &[u8],
    ) -> Result<GpuBuffer, GpuError> {
        let buffer = self.guard_allocation(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: buffer_usages(usage),
                })
        })?;

        let raw = WgpuRawBuffer {
            id: self.allocate_id(),
            buffer,
        };
        Ok(GpuBuffer::from_raw(
            Box::new(raw),
            label,
            usage,
            contents.len() as u64,
        ))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Arc<GpuTexture>, GpuError> {
        let texture = self.guard_allocation(|| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: desc.depth_or_layers,
                },
                mip_level_count: desc.mip_levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texel_format(desc.format, desc.stencil),
                usage: texture_usages(desc.usage),
                view_formats: &[],
            })
        })?;

        let raw = WgpuRawTexture {
            id: self.allocate_id(),
            texture,
        };
        Ok(Arc::new(GpuTexture::from_raw(
            Box::new(raw),
            desc.label,
            desc.usage,
            desc.format,
            desc.width,
            desc.height,
            desc.depth_or_layers,
            desc.mip_levels,
        )))
    }

    fn create_texture_view(&self, texture: &Arc<GpuTexture>) -> GpuTextureView {
        self.create_texture_view_with_mips(texture, 0, texture.mip_levels())
    }

    fn create_texture_view_with_mips(
        &self,
        texture: &Arc<GpuTexture>,
        base_mip_level: u32,
        mip_levels: u32,
    ) -> GpuTextureView {
        let view = raw_texture(texture).create_view(&wgpu::TextureViewDescriptor {
            base_mip_level,
            mip_level_count: Some(mip_levels),
            dimension: if texture.usage().contains(TextureUsages::CUBEMAP_COMPATIBLE) {
                Some(wgpu::TextureViewDimension::Cube)
            } else {
                None
            },
            ..Default::default()
        });

        let raw = WgpuRawTextureView {
            id: self.allocate_id(),
            view,
        };
        GpuTextureView::from_raw(Box::new(raw), texture.clone(), base_mip_level, mip_levels)
    }

    fn create_command_encoder(&self) -> Box<dyn CommandEncoder + '_> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("resource layer encoder"),
            });
        Box::new(WgpuEncoder {
            device: self,
            encoder: Some(encoder),
        })
    }

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.get()
    }
}

struct WgpuEncoder<'a> {
    device: &'a WgpuDevice,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuEncoder<'_> {
    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder
            .as_mut()
            .expect("the command encoder has already been submitted")
    }
}

impl Drop for WgpuEncoder<'_> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.device.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

impl CommandEncoder for WgpuEncoder<'_> {
    fn write_buffer(&mut self, dst: GpuBufferSlice<'_>, data: &[u8]) -> Result<(), GpuError> {
        require_open_buffer(dst.buffer())?;
        require_buffer_usage(dst.buffer(), BufferUsages::COPY_DST)?;
        if data.len() as u64 > dst.length() {
            return Err(GpuError::OutOfRange {
                offset: dst.offset(),
                length: data.len() as u64,
                bound: dst.length(),
            });
        }

        self.device
            .queue
            .write_buffer(raw_buffer(dst.buffer()), dst.offset(), data);
        Ok(())
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: GpuBufferSlice<'_>,
        dst: GpuBufferSlice<'_>,
    ) -> Result<(), GpuError> {
        require_open_buffer(src.buffer())?;
        require_open_buffer(dst.buffer())?;
        require_buffer_usage(src.buffer(), BufferUsages::COPY_SRC)?;
        require_buffer_usage(dst.buffer(), BufferUsages::COPY_DST)?;
        if src.length() != dst.length() {
            return Err(GpuError::InvalidState(
                "buffer-to-buffer copies require equally sized slices",
            ));
        }

        let (src_raw, dst_raw) = (raw_buffer(src.buffer()), raw_buffer(dst.buffer()));
        self.encoder().copy_buffer_to_buffer(
            src_raw,
            src.offset(),
            dst_raw,
            dst.offset(),
            src.length(),
        );
        Ok(())
    }

    fn copy_texture_to_texture(
        &mut self,
        src: &GpuTexture,
        dst: &GpuTexture,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        let (src_raw, dst_raw) = (raw_texture(src), raw_texture(dst));
        self.encoder().copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: src_raw,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: dst_raw,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: &GpuTexture,
        dst: &GpuBuffer,
        offset: u64,
        mip_level: u32,
        on_complete: Box<dyn FnOnce() + 'static>,
    ) -> Result<(), GpuError> {
        require_open_buffer(dst)?;
        require_buffer_usage(dst, BufferUsages::COPY_DST)?;

        let width = src.width_at(mip_level);
        let height = src.height_at(mip_level);
        let bytes_per_row = width * src.format().bytes_per_texel();
        if bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
            return Err(GpuError::InvalidState(
                "readback row size must be a multiple of 256 bytes",
            ));
        }

        let src_raw = raw_texture(src);
        let dst_raw = raw_buffer(dst);
        self.encoder().copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: src_raw,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: dst_raw,
                layout: wgpu::TexelCopyBufferLayout {
                    offset,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        // The callback fires once the queue reaches the submission this
        // encoder ends up in; the receiver is drained by
        // `process_completions`.
        let (tx, rx) = mpsc::channel();
        self.device.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        self.device
            .completions
            .borrow_mut()
            .push((rx, on_complete));
        Ok(())
    }

    fn clear_color_texture(&mut self, texture: &GpuTexture, color: Color) -> Result<(), GpuError> {
        if texture.is_closed() {
            return Err(GpuError::Closed {
                label: texture.label().to_owned(),
            });
        }

        let view = raw_texture(texture).create_view(&Default::default());
        let [r, g, b, a] = color.to_f64_components();
        self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        Ok(())
    }

    fn clear_color_and_depth_textures(
        &mut self,
        color_texture: &GpuTexture,
        color: Color,
        depth_texture: &GpuTexture,
        depth: f32,
    ) -> Result<(), GpuError> {
        for texture in [color_texture, depth_texture] {
            if texture.is_closed() {
                return Err(GpuError::Closed {
                    label: texture.label().to_owned(),
                });
            }
        }

        let color_view = raw_texture(color_texture).create_view(&Default::default());
        let depth_view = raw_texture(depth_texture).create_view(&Default::default());
        let [r, g, b, a] = color.to_f64_components();
        self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(depth),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        });
        Ok(())
    }

    fn begin_render_pass<'pass>(
        &'pass mut self,
        label: &str,
        color: &'pass GpuTextureView,
        depth: Option<&'pass GpuTextureView>,
    ) -> Box<dyn RenderPass + 'pass> {
        let device = self.device;
        let pass = self
            .encoder()
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: raw_view(color),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth.map(|depth| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view: raw_view(depth),
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                ..Default::default()
            })
            .forget_lifetime();

        Box::new(WgpuRenderPass {
            device,
            pass,
            pipeline: None,
        })
    }

    fn map_buffer<'a>(
        &mut self,
        slice: GpuBufferSlice<'a>,
        read: bool,
        write: bool,
    ) -> Result<Box<dyn MappedBuffer + 'a>, GpuError> {
        require_open_buffer(slice.buffer())?;
        if read {
            require_buffer_usage(slice.buffer(), BufferUsages::MAP_READ)?;
        }
        if write {
            require_buffer_usage(slice.buffer(), BufferUsages::MAP_WRITE)?;
        }
        if !read && !write {
            return Err(GpuError::InvalidState(
                "mapping a buffer requires read or write access",
            ));
        }

        let buffer = raw_buffer(slice.buffer());
        let range = slice.offset()..slice.offset() + slice.length();
        let mode = if write {
            wgpu::MapMode::Write
        } else {
            wgpu::MapMode::Read
        };

        let (tx, rx) = mpsc::channel();
        buffer.slice(range.clone()).map_async(mode, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                return Err(GpuError::InvalidState(
                    "the device failed to map the buffer",
                ))
            }
        }

        let view = if write {
            MappedView::Write(buffer.slice(range).get_mapped_range_mut())
        } else {
            MappedView::Read(buffer.slice(range).get_mapped_range())
        };
        Ok(Box::new(WgpuMapped {
            buffer,
            view: Some(view),
        }))
    }

    fn present_texture(&mut self, view: &GpuTextureView) -> Result<(), GpuError> {
        let frame = self.device.frame_view.borrow();
        let Some(frame_view) = frame.as_ref() else {
            return Err(GpuError::InvalidState(
                "presenting a texture without an acquired frame",
            ));
        };
        let presenter = self.device.presenter.borrow();
        let Some(presenter) = presenter.as_ref() else {
            return Err(GpuError::InvalidState(
                "presenting a texture without a configured surface",
            ));
        };

        let bind_group = self.device.sampler_bind_group(view);
        let quad_vertices = &self.device.quad_vertices;
        let quad_indices = &self.device.quad_indices;

        let mut pass = self
            .encoder
            .as_mut()
            .expect("the command encoder has already been submitted")
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: frame_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
        pass.set_pipeline(presenter);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_vertices.slice(..));
        pass.set_index_buffer(quad_indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..6, 0, 0..1);
        Ok(())
    }
}

struct WgpuRenderPass<'a> {
    device: &'a WgpuDevice,
    pass: wgpu::RenderPass<'static>,
    /// The name of the currently selected pipeline.
    pipeline: Option<String>,
}

impl WgpuRenderPass<'_> {
    fn with_pipeline<R>(&self, f: impl FnOnce(&RegisteredPipeline) -> R) -> R {
        let name = self
            .pipeline
            .as_deref()
            .expect("no pipeline has been selected for this render pass");
        let pipelines = self.device.pipelines.borrow();
        match pipelines.get(name) {
            Some(registered) => f(registered),
            None => panic!("pipeline `{name}` is not registered"),
        }
    }
}

impl RenderPass for WgpuRenderPass<'_> {
    fn set_pipeline(&mut self, pipeline: &str) {
        let pipelines = self.device.pipelines.borrow();
        match pipelines.get(pipeline) {
            Some(registered) => self.pass.set_pipeline(&registered.pipeline),
            None => panic!("pipeline `{pipeline}` is not registered"),
        }
        drop(pipelines);
        self.pipeline = Some(pipeline.to_owned());
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer) {
        self.pass.set_vertex_buffer(slot, raw_buffer(buffer).slice(..));
    }

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: IndexFormat) {
        let format = match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        };
        self.pass.set_index_buffer(raw_buffer(buffer).slice(..), format);
    }

    fn bind_sampler(&mut self, name: &str, view: &GpuTextureView) {
        let group = self.with_pipeline(|registered| match registered.samplers.get(name) {
            Some(&group) => group,
            None => panic!("the selected pipeline has no sampler named `{name}`"),
        });
        let bind_group = self.device.sampler_bind_group(view);
        self.pass.set_bind_group(group, &bind_group, &[]);
    }

    fn bind_uniform(&mut self, name: &str, slice: GpuBufferSlice<'_>) {
        let group = self.with_pipeline(|registered| match registered.uniforms.get(name) {
            Some(&group) => group,
            None => panic!("the selected pipeline has no uniform named `{name}`"),
        });
        let bind_group = self
            .device
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &self.device.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: raw_buffer(slice.buffer()),
                        offset: slice.offset(),
                        size: std::num::NonZeroU64::new(slice.length()),
                    }),
                }],
            });
        self.pass.set_bind_group(group, &bind_group, &[]);
    }

    fn draw_indexed(
        &mut self,
        base_vertex: i32,
        first_index: u32,
        index_count: u32,
        instance_count: u32,
    ) {
        self.pass.draw_indexed(
            first_index..first_index + index_count,
            base_vertex,
            0..instance_count,
        );
    }
}

enum MappedView<'a> {
    Read(wgpu::BufferView<'a>),
    Write(wgpu::BufferViewMut<'a>),
}

struct WgpuMapped<'a> {
    buffer: &'a wgpu::Buffer,
    view: Option<MappedView<'a>>,
}

impl MappedBuffer for WgpuMapped<'_> {
    fn data(&self) -> &[u8] {
        match self.view.as_ref() {
            Some(MappedView::Read(view)) => view,
            Some(MappedView::Write(view)) => view,
            None => &[],
        }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        match self.view.as_mut() {
            Some(MappedView::Write(view)) => view,
            _ => panic!("the buffer was not mapped for writing"),
        }
    }
}

impl Drop for WgpuMapped<'_> {
    fn drop(&mut self) {
        // The mapped range must be released before the buffer is unmapped.
        self.view = None;
        self.buffer.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_masks_translate_bit_by_bit() {
        let usage = BufferUsages::VERTEX | BufferUsages::COPY_DST | BufferUsages::MAP_READ;
        let translated = buffer_usages(usage);
        assert!(translated.contains(wgpu::BufferUsages::VERTEX));
        assert!(translated.contains(wgpu::BufferUsages::COPY_DST));
        assert!(translated.contains(wgpu::BufferUsages::MAP_READ));
        assert!(!translated.contains(wgpu::BufferUsages::INDEX));

        // The client-storage hint has no wgpu counterpart.
        assert!(buffer_usages(BufferUsages::HINT_CLIENT_STORAGE).is_empty());
    }

    #[test]
    fn depth_format_depends_on_the_stencil_flag() {
        assert_eq!(
            texel_format(TextureFormat::Depth32, false),
            wgpu::TextureFormat::Depth32Float
        );
        assert_eq!(
            texel_format(TextureFormat::Depth32, true),
            wgpu::TextureFormat::Depth32FloatStencil8
        );
        // Color formats ignore the flag.
        assert_eq!(
            texel_format(TextureFormat::Rgba8, true),
            wgpu::TextureFormat::Rgba8Unorm
        );
    }
}
