use std::sync::Arc;

use cobble_render::DeviceCapabilities;

use crate::WgpuDevice;

pub use wgpu::PresentMode;

/// The configuration of a [`Surface`].
#[derive(Clone, Debug)]
pub struct SurfaceConfig {
    /// The width of the surface, in pixels.
    pub width: u32,
    /// The height of the surface, in pixels.
    pub height: u32,
    /// The present mode of the surface.
    pub present_mode: PresentMode,
}

/// A connection to a window that frames can be presented on.
///
/// Creating a surface also establishes the device connection: the surface
/// owns the [`WgpuDevice`] that the rest of the renderer allocates from.
pub struct Surface<'window> {
    /// The device created alongside this surface.
    device: Arc<WgpuDevice>,
    /// The configuration of the surface.
    config: SurfaceConfig,
    /// The format frames are presented in.
    format: wgpu::TextureFormat,
    /// The underlying window surface.
    surface: wgpu::Surface<'window>,
    /// Set when `config` has changed since the surface was last configured.
    config_dirty: bool,
    /// The alpha mode the surface was created with, kept around for
    /// re-configuration.
    alpha_mode: wgpu::CompositeAlphaMode,
}

impl<'window> Surface<'window> {
    /// Creates a new [`Surface`] on the provided window, connecting to the
    /// best available GPU.
    ///
    /// # Panics
    ///
    /// Panics if no compatible GPU is found or if the graphics API cannot be
    /// initialized.
    pub async fn new(window: impl Into<wgpu::SurfaceTarget<'window>>) -> Self {
        cobble_log::trace!("initiating a connection with the GPU...");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .expect("GPU api not available");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .expect("failed to find an appropriate GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .expect("failed to establish a connection with the selected GPU");

        let info = adapter.get_info();
        cobble_log::info!("established a connection with the GPU!");
        cobble_log::info!("GPU: {} ({:?})", info.name, info.backend);

        let config = surface
            .get_default_config(&adapter, 0, 0)
            .expect("the selected GPU is not compatible with the surface");

        cobble_log::info!("surface format: {:?}", config.format);
        cobble_log::info!("present mode: {:?}", config.present_mode);

        let device = Arc::new(WgpuDevice::new(device, queue));
        device.install_presenter(config.format);

        // GL drivers are where in-place rewrites of a bound buffer have
        // historically gone wrong.
        device.set_capabilities(DeviceCapabilities {
            prefer_fresh_immediate_buffers: info.backend == wgpu::Backend::Gl,
        });

        Self {
            device,
            config: SurfaceConfig {
                width: 0,
                height: 0,
                present_mode: config.present_mode,
            },
            format: config.format,
            surface,
            config_dirty: false,
            alpha_mode: config.alpha_mode,
        }
    }

    /// Returns the device created alongside this surface.
    #[inline]
    pub fn device(&self) -> &Arc<WgpuDevice> {
        &self.device
    }

    /// Returns the format frames are presented in.
    #[inline]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Returns a shared reference to the [`SurfaceConfig`] of this surface.
    #[inline]
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// Returns an exclusive reference to the [`SurfaceConfig`] of this
    /// surface, marking it dirty.
    ///
    /// The surface re-configures itself at the start of the next frame. If
    /// you are not sure whether the configuration actually needs to change,
    /// gate the call behind a comparison.
    #[inline]
    pub fn config_mut(&mut self) -> &mut SurfaceConfig {
        self.config_dirty = true;
        &mut self.config
    }

    /// Acquires the next frame and makes it the target of
    /// [`present_texture`] calls until [`end_frame`].
    ///
    /// Returns [`None`] when the surface is out of date with its window or a
    /// timeout was reached; the caller should skip the frame and try again.
    ///
    /// # Panics
    ///
    /// Panics if the swap chain fails for any other reason.
    ///
    /// [`present_texture`]: cobble_render::CommandEncoder::present_texture
    /// [`end_frame`]: Surface::end_frame
    #[profiling::function]
    pub fn begin_frame(&mut self) -> Option<Frame> {
        if self.config_dirty {
            self.config_dirty = false;
            self.surface.configure(
                self.device.wgpu_device(),
                &wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format: self.format,
                    width: self.config.width,
                    height: self.config.height,
                    present_mode: self.config.present_mode,
                    alpha_mode: self.alpha_mode,
                    view_formats: Vec::new(),
                    desired_maximum_frame_latency: 2,
                },
            );
        }

        let texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Timeout) => return None,
            Err(err) => panic!("failed to acquire surface texture: {err}"),
        };

        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.device.set_frame_view(Some(view.clone()));

        Some(Frame { texture, view })
    }

    /// Presents `frame` to the window and runs any pending readback
    /// completion callbacks.
    #[profiling::function]
    pub fn end_frame(&mut self, frame: Frame) {
        self.device.set_frame_view(None);
        frame.texture.present();
        self.device.process_completions();
    }
}

/// A frame in flight, acquired from a [`Surface`].
pub struct Frame {
    /// The swap-chain texture backing the frame.
    texture: wgpu::SurfaceTexture,
    /// A view over the whole frame.
    view: wgpu::TextureView,
}

impl Frame {
    /// Returns a view over the whole frame.
    #[inline]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}
