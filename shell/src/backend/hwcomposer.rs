//! Hwcomposer output for Droidian/libhybris devices
//!
//! The display pipeline comes from `flick-hwc`: it brings up hwcomposer2,
//! hands out an `ANativeWindow` and presents every buffer EGL queues on it.
//! Here the window becomes an EGL surface for smithay's GLES renderer.
//!
//! With the virtual composer there is no native window; frames are queued
//! straight into the presentation pipeline instead of being drawn.
//!
//! Environment variables:
//! - EGL_PLATFORM=hwcomposer (set automatically)
//! - FLICK_DISPLAY_WIDTH / FLICK_DISPLAY_HEIGHT (optional, override display size)

use std::{ffi::c_void, sync::Arc};

use anyhow::{anyhow, Result};
use flick_hwc::{Fence, HwcContext};
use khronos_egl as egl;
use smithay::{
    backend::{
        egl::{
            context::{GlAttributes, PixelFormatRequirements},
            display::EGLDisplayHandle,
            ffi,
            native::EGLNativeSurface,
            EGLContext, EGLDisplay, EGLError, EGLSurface,
        },
        renderer::{damage::OutputDamageTracker, gles::GlesRenderer, Bind},
    },
    output::Output,
};
use tracing::{debug, info, trace, warn};

use super::render::{self, CLEAR_COLOR};
use crate::state::Flick;

/// `ANativeWindow` owned by the hwc context.
struct HwcWindow(*mut c_void);

// The window outlives the surface: the context is destroyed after the
// renderer is dropped.
unsafe impl Send for HwcWindow {}

unsafe impl EGLNativeSurface for HwcWindow {
    fn create(
        &self,
        display: &Arc<EGLDisplayHandle>,
        config_id: ffi::egl::types::EGLConfig,
    ) -> Result<*const c_void, EGLError> {
        let attributes = [ffi::egl::NONE as ffi::egl::types::EGLint];
        let surface = unsafe {
            ffi::egl::CreateWindowSurface(
                display.handle,
                config_id,
                self.0 as ffi::egl::types::NativeWindowType,
                attributes.as_ptr(),
            )
        };
        if surface.is_null() {
            Err(EGLError::BadNativeWindow)
        } else {
            Ok(surface)
        }
    }
}

/// GLES renderer drawing into the hwcomposer native window.
struct EglOutput {
    renderer: GlesRenderer,
    surface: EGLSurface,
    damage_tracker: OutputDamageTracker,
}

impl EglOutput {
    fn new(window: *mut c_void, output: &Output) -> Result<Self> {
        std::env::set_var("EGL_PLATFORM", "hwcomposer");

        // Load EGL dynamically; libhybris picks the platform from EGL_PLATFORM
        let egl = unsafe { egl::DynamicInstance::<egl::EGL1_4>::load_required() }
            .map_err(|e| anyhow!("Failed to load EGL: {:?}", e))?;
        let raw_display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| anyhow!("Failed to get EGL display"))?;
        let (major, minor) = egl
            .initialize(raw_display)
            .map_err(|e| anyhow!("Failed to initialize EGL: {:?}", e))?;
        info!("EGL initialized: {}.{}", major, minor);

        let display = unsafe {
            EGLDisplay::from_raw(raw_display.as_ptr() as *mut _, std::ptr::null_mut())
        }
        .map_err(|e| anyhow!("Failed to wrap EGL display: {:?}", e))?;
        let context = EGLContext::new_with_config(
            &display,
            GlAttributes {
                version: (2, 0),
                profile: None,
                debug: false,
                vsync: false,
            },
            PixelFormatRequirements::_8_bit(),
        )
        .map_err(|e| anyhow!("Failed to create EGL context: {:?}", e))?;
        let pixel_format = context
            .pixel_format()
            .ok_or_else(|| anyhow!("EGL context has no pixel format"))?;
        let surface = unsafe {
            EGLSurface::new(&display, pixel_format, context.config_id(), HwcWindow(window))
        }
        .map_err(|e| anyhow!("Failed to create EGL window surface: {:?}", e))?;
        info!("Created EGL surface on hwcomposer window");

        let renderer = unsafe { GlesRenderer::new(context) }
            .map_err(|e| anyhow!("Failed to create GLES renderer: {:?}", e))?;

        Ok(Self {
            renderer,
            surface,
            damage_tracker: OutputDamageTracker::from_output(output),
        })
    }

    fn render(&mut self, state: &Flick) -> Result<()> {
        let elements = render::render_elements(&mut self.renderer, state);
        let age = self.surface.buffer_age().unwrap_or(0).max(0) as usize;
        {
            let mut target = self
                .renderer
                .bind(&mut self.surface)
                .map_err(|e| anyhow!("Failed to bind EGL surface: {:?}", e))?;
            self.damage_tracker
                .render_output(&mut self.renderer, &mut target, age, &elements, CLEAR_COLOR)
                .map_err(|e| anyhow!("Render failed: {:?}", e))?;
        }
        // flick-hwc's present callback takes it from here
        self.surface
            .swap_buffers(None)
            .map_err(|e| anyhow!("Failed to swap buffers: {:?}", e))?;
        Ok(())
    }
}

/// Where frames go.
enum Target {
    Egl(EglOutput),
    /// No native window: queue already-signaled frames.
    Direct,
}

/// The hwcomposer display as seen by the compositor.
pub struct HwcOutput {
    ctx: HwcContext,
    target: Option<Target>,
    frames: u64,
}

impl HwcOutput {
    pub fn new(ctx: HwcContext, output: &Output) -> Result<Self> {
        let window = ctx.native_window();
        let target = if window.is_null() {
            info!("No native window ({} backend), presenting directly", ctx.backend_name());
            Target::Direct
        } else {
            Target::Egl(EglOutput::new(window, output)?)
        };
        Ok(Self {
            ctx,
            target: Some(target),
            frames: 0,
        })
    }

    pub fn context(&mut self) -> &mut HwcContext {
        &mut self.ctx
    }

    pub fn render(&mut self, state: &Flick, output: &Output) -> Result<()> {
        match self.target.as_mut() {
            Some(Target::Egl(egl)) => egl.render(state)?,
            Some(Target::Direct) => {
                trace!(items = ?state.desktop.render_list(), "Frame");
                self.ctx
                    .queue_frame(Fence::signaled())
                    .map_err(|e| anyhow!("Failed to queue frame: {}", e))?;
            }
            None => return Ok(()),
        }
        render::send_frames(state, output);
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Tear down the renderer, then the display pipeline.
    pub fn shutdown(&mut self) {
        self.target = None;
        if let Err(e) = self.ctx.set_vsync_enabled(false) {
            debug!("Disabling vsync on shutdown: {}", e);
        }
        let stats = self.ctx.stats();
        info!(
            frames = stats.frames,
            errors = stats.errors,
            dropped_events = self.ctx.dropped_events(),
            "Display shutting down"
        );
        self.ctx.destroy();
    }
}

impl Drop for HwcOutput {
    fn drop(&mut self) {
        if self.target.is_some() {
            warn!("HwcOutput dropped without shutdown");
            self.shutdown();
        }
    }
}
