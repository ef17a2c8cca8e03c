//! Bring the display up and cycle a few solid colors.
//!
//! `FLICK_HWC_BACKEND=virtual` exercises the pipeline without hardware;
//! there the frames are queued directly since there is nothing to draw with.

use calloop::channel::Event;
use calloop::EventLoop;
use flick_hwc::{Backend, Fence, HwcContext, InitOptions};
use std::cell::Cell;
use std::ffi::c_void;
use std::rc::Rc;
use std::time::Duration;

const FRAMES: usize = 180;
const GL_COLOR_BUFFER_BIT: u32 = 0x0000_4000;

const COLORS: [(&str, [f32; 3]); 6] = [
    ("RED", [1.0, 0.0, 0.0]),
    ("GREEN", [0.0, 1.0, 0.0]),
    ("BLUE", [0.0, 0.0, 1.0]),
    ("YELLOW", [1.0, 1.0, 0.0]),
    ("MAGENTA", [1.0, 0.0, 1.0]),
    ("CYAN", [0.0, 1.0, 1.0]),
];

/// Just enough EGL/GLES, loaded at runtime, to clear a window surface.
struct Gl {
    display: *mut c_void,
    surface: *mut c_void,
    swap_buffers: unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32,
    clear_color: unsafe extern "C" fn(f32, f32, f32, f32),
    clear: unsafe extern "C" fn(u32),
}

unsafe fn open_lib(names: &[&[u8]]) -> *mut c_void {
    for name in names {
        let lib = libc::dlopen(name.as_ptr().cast(), libc::RTLD_NOW | libc::RTLD_GLOBAL);
        if !lib.is_null() {
            return lib;
        }
    }
    std::ptr::null_mut()
}

unsafe fn sym<T: Copy>(lib: *mut c_void, name: &[u8]) -> Option<T> {
    let ptr = libc::dlsym(lib, name.as_ptr().cast());
    (!ptr.is_null()).then(|| std::mem::transmute_copy(&ptr))
}

impl Gl {
    unsafe fn new(window: *mut c_void) -> Option<Self> {
        const EGL_NONE: i32 = 0x3038;
        const EGL_RENDERABLE_TYPE: i32 = 0x3040;
        const EGL_OPENGL_ES2_BIT: i32 = 0x0004;
        const EGL_CONTEXT_CLIENT_VERSION: i32 = 0x3098;

        let egl = open_lib(&[b"libEGL.so.1\0", b"libEGL.so\0"]);
        let gles = open_lib(&[b"libGLESv2.so.2\0", b"libGLESv2.so\0"]);
        if egl.is_null() || gles.is_null() {
            println!("Failed to load EGL/GLES");
            return None;
        }

        type GetDisplay = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
        type Initialize = unsafe extern "C" fn(*mut c_void, *mut i32, *mut i32) -> u32;
        type ChooseConfig =
            unsafe extern "C" fn(*mut c_void, *const i32, *mut *mut c_void, i32, *mut i32) -> u32;
        type CreateContext =
            unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void, *const i32) -> *mut c_void;
        type CreateWindowSurface =
            unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void, *const i32) -> *mut c_void;
        type MakeCurrent =
            unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void, *mut c_void) -> u32;

        let get_display: GetDisplay = sym(egl, b"eglGetDisplay\0")?;
        let initialize: Initialize = sym(egl, b"eglInitialize\0")?;
        let choose_config: ChooseConfig = sym(egl, b"eglChooseConfig\0")?;
        let create_context: CreateContext = sym(egl, b"eglCreateContext\0")?;
        let create_surface: CreateWindowSurface = sym(egl, b"eglCreateWindowSurface\0")?;
        let make_current: MakeCurrent = sym(egl, b"eglMakeCurrent\0")?;

        let display = get_display(std::ptr::null_mut());
        if display.is_null() || initialize(display, std::ptr::null_mut(), std::ptr::null_mut()) == 0 {
            println!("eglInitialize failed");
            return None;
        }
        let attribs = [EGL_RENDERABLE_TYPE, EGL_OPENGL_ES2_BIT, EGL_NONE];
        let mut config = std::ptr::null_mut();
        let mut count = 0;
        if choose_config(display, attribs.as_ptr(), &mut config, 1, &mut count) == 0 || count < 1 {
            println!("eglChooseConfig found nothing");
            return None;
        }
        let ctx_attribs = [EGL_CONTEXT_CLIENT_VERSION, 2, EGL_NONE];
        let context = create_context(display, config, std::ptr::null_mut(), ctx_attribs.as_ptr());
        let surface = create_surface(display, config, window, std::ptr::null());
        if context.is_null() || surface.is_null() {
            println!("Failed to create EGL context or surface");
            return None;
        }
        if make_current(display, surface, surface, context) == 0 {
            println!("eglMakeCurrent failed");
            return None;
        }

        Some(Self {
            display,
            surface,
            swap_buffers: sym(egl, b"eglSwapBuffers\0")?,
            clear_color: sym(gles, b"glClearColor\0")?,
            clear: sym(gles, b"glClear\0")?,
        })
    }

    unsafe fn frame(&self, [r, g, b]: [f32; 3]) -> bool {
        (self.clear_color)(r, g, b, 1.0);
        (self.clear)(GL_COLOR_BUFFER_BIT);
        (self.swap_buffers)(self.display, self.surface) != 0
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    println!("=== Flick hwcomposer test ===");
    let backend = Backend::from_env();
    println!("Backend: {}", backend.name());

    let mut ctx = match HwcContext::init(backend, InitOptions::default()) {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("Failed to initialize display: {}", e);
            std::process::exit(1);
        }
    };

    let info = ctx.display_info();
    println!("Display initialized successfully!");
    println!("  Resolution: {}x{}", info.width, info.height);
    println!("  Refresh rate: {:.2} Hz", info.refresh_rate);
    println!("  DPI: {:.1}x{:.1}", info.dpi_x, info.dpi_y);
    println!(
        "  Physical size: {}mm x {}mm",
        info.physical_width, info.physical_height
    );

    let mut event_loop: EventLoop<HwcContext> = match EventLoop::try_new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            println!("Failed to create event loop: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(channel) = ctx.take_event_channel() {
        let _ = event_loop.handle().insert_source(channel, |event, _, ctx| {
            if let Event::Msg(event) = event {
                ctx.handle_event(event);
            }
        });
    }

    let vsyncs = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&vsyncs);
    ctx.set_vsync_callback(Some(Box::new(move |_| counter.set(counter.get() + 1))));
    if let Err(e) = ctx.set_vsync_enabled(true) {
        println!("Enabling vsync failed: {}", e);
    }

    let window = ctx.native_window();
    let gl = if window.is_null() {
        println!("No EGL window, queueing frames directly");
        None
    } else {
        match unsafe { Gl::new(window) } {
            Some(gl) => Some(gl),
            None => std::process::exit(1),
        }
    };

    println!("\nRendering colored frames...");
    for i in 0..FRAMES {
        let (name, color) = COLORS[(i / 30) % COLORS.len()];
        let ok = match &gl {
            Some(gl) => unsafe { gl.frame(color) },
            None => match ctx.queue_frame(Fence::signaled()) {
                Ok(()) => true,
                Err(e) => {
                    println!("Frame {} failed: {}", i, e);
                    false
                }
            },
        };
        if !ok {
            break;
        }
        if i % 30 == 0 {
            println!("Frame {}: Showing {}", i, name);
        }
        let _ = event_loop.dispatch(Some(Duration::from_millis(16)), &mut ctx);
    }

    let stats = ctx.stats();
    println!(
        "\nPresented {} frames, {} errors, {} vsyncs, {} dropped events",
        stats.frames,
        stats.errors,
        vsyncs.get(),
        ctx.dropped_events()
    );
    let _ = ctx.set_vsync_enabled(false);
    ctx.destroy();
}
