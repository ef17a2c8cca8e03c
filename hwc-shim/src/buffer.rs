//! Buffer formats, layouts and the allocator seam
//!
//! Buffers are described with DRM fourcc formats on the API side and
//! translated to Android HAL pixel formats when they reach gralloc.

use crate::{Error, Result};
use std::fmt;
use std::ops::BitOr;
use std::os::raw::c_void;

/// Reported for every buffer: gralloc predates modifier negotiation.
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// HAL pixel formats understood by gralloc.
pub mod hal_format {
    pub const RGBA_8888: i32 = 1;
    pub const RGBX_8888: i32 = 2;
    pub const RGB_565: i32 = 4;
    pub const BGRA_8888: i32 = 5;
    pub const YCBCR_420_888: i32 = 0x23;
}

/// Supported buffer formats (DRM fourcc codes)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Xrgb8888 = 0x3432_5258, // 'XR24'
    Argb8888 = 0x3432_5241, // 'AR24'
    Xbgr8888 = 0x3432_4258, // 'XB24'
    Abgr8888 = 0x3432_4241, // 'AB24'
    Rgb565 = 0x3631_4752,   // 'RG16'
    Nv12 = 0x3231_564e,     // 'NV12'
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Xrgb8888,
        PixelFormat::Argb8888,
        PixelFormat::Xbgr8888,
        PixelFormat::Abgr8888,
        PixelFormat::Rgb565,
        PixelFormat::Nv12,
    ];

    pub fn from_fourcc(fourcc: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.fourcc() == fourcc)
    }

    pub fn fourcc(self) -> u32 {
        self as u32
    }

    /// Gralloc format used to back this fourcc.
    pub fn hal_format(self) -> i32 {
        match self {
            PixelFormat::Argb8888 => hal_format::BGRA_8888,
            PixelFormat::Abgr8888 => hal_format::RGBA_8888,
            PixelFormat::Xrgb8888 | PixelFormat::Xbgr8888 => hal_format::RGBX_8888,
            PixelFormat::Rgb565 => hal_format::RGB_565,
            PixelFormat::Nv12 => hal_format::YCBCR_420_888,
        }
    }

    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            _ => 1,
        }
    }

    /// Bytes per pixel of the first plane.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Nv12 => 1,
            _ => 4,
        }
    }

    /// Bits per pixel as reported by `gbm_bo_get_bpp`.
    pub fn bpp(self) -> u32 {
        match self {
            PixelFormat::Nv12 => 12,
            other => other.bytes_per_pixel() * 8,
        }
    }
}

/// GBM usage flags, translated to gralloc usage on allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const SCANOUT: BufferUsage = BufferUsage(1 << 0);
    pub const CURSOR: BufferUsage = BufferUsage(1 << 1);
    pub const RENDERING: BufferUsage = BufferUsage(1 << 2);
    pub const WRITE: BufferUsage = BufferUsage(1 << 3);
    pub const LINEAR: BufferUsage = BufferUsage(1 << 4);

    pub const fn from_bits(bits: u32) -> Self {
        BufferUsage(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: BufferUsage) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn gralloc_usage(self) -> u64 {
        const HW_TEXTURE: u64 = 0x0000_0100;
        const HW_RENDER: u64 = 0x0000_0200;
        const HW_COMPOSER: u64 = 0x0000_0800;
        const HW_FB: u64 = 0x0000_1000;
        const SW_WRITE_OFTEN: u64 = 0x0000_0030;
        const SW_READ_OFTEN: u64 = 0x0000_0003;

        let mut usage = HW_TEXTURE;
        if self.contains(Self::RENDERING) {
            usage |= HW_RENDER;
        }
        if self.contains(Self::SCANOUT) {
            usage |= HW_COMPOSER | HW_FB;
        }
        if self.contains(Self::WRITE) || self.contains(Self::LINEAR) {
            usage |= SW_WRITE_OFTEN | SW_READ_OFTEN;
        }
        usage
    }
}

impl BitOr for BufferUsage {
    type Output = BufferUsage;

    fn bitor(self, rhs: Self) -> Self {
        BufferUsage(self.0 | rhs.0)
    }
}

/// Key of a buffer inside a [`GbmDevice`](crate::GbmDevice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque native buffer handle (`buffer_handle_t`, `ANativeWindowBuffer*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        NativeHandle(ptr as usize)
    }

    pub fn from_raw(value: usize) -> Self {
        NativeHandle(value)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// What the allocator hands back for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub handle: NativeHandle,
    /// Row pitch in pixels, as gralloc reports it.
    pub stride_pixels: u32,
}

/// Raw buffer allocation backend (gralloc or the virtual allocator).
pub trait Allocator: Send {
    /// One-time setup; must precede any other call.
    fn initialize(&mut self) -> Result<()>;

    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<Allocation>;

    fn release(&mut self, handle: NativeHandle);
}

/// Per-plane layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneLayout {
    pub planes: usize,
    pub strides: [u32; 4],
    pub offsets: [u32; 4],
    pub size: u64,
}

impl PlaneLayout {
    /// Layout of a buffer whose luma/packed plane is `stride_pixels` wide.
    ///
    /// Fails when a stride or plane offset does not fit in 32 bits.
    pub fn compute(format: PixelFormat, height: u32, stride_pixels: u32) -> Result<Self> {
        let overflow = || {
            Error::AllocationFailure(format!(
                "{:?} layout overflows: stride {} px, height {}",
                format, stride_pixels, height
            ))
        };
        let mut layout = PlaneLayout {
            planes: format.plane_count(),
            ..Default::default()
        };
        let stride = stride_pixels
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(overflow)?;
        layout.strides[0] = stride;
        layout.size = stride as u64 * height as u64;

        if format == PixelFormat::Nv12 {
            // Interleaved CbCr at half vertical resolution, same pitch.
            let chroma_rows = height.div_ceil(2);
            layout.strides[1] = stride;
            layout.offsets[1] = stride.checked_mul(height).ok_or_else(overflow)?;
            layout.size += stride as u64 * chroma_rows as u64;
        }
        Ok(layout)
    }
}

/// Metadata of an allocated or imported buffer ("bo").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferObject {
    id: BufferId,
    width: u32,
    height: u32,
    format: PixelFormat,
    usage: BufferUsage,
    layout: PlaneLayout,
    handle: NativeHandle,
    fd: Option<i32>,
}

impl BufferObject {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: BufferId,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
        layout: PlaneLayout,
        handle: NativeHandle,
        fd: Option<i32>,
    ) -> Self {
        Self {
            id,
            width,
            height,
            format,
            usage,
            layout,
            handle,
            fd,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row of the first plane.
    pub fn stride(&self) -> u32 {
        self.layout.strides[0]
    }

    pub fn stride_for_plane(&self, plane: usize) -> Option<u32> {
        (plane < self.layout.planes).then(|| self.layout.strides[plane])
    }

    pub fn offset(&self, plane: usize) -> Option<u32> {
        (plane < self.layout.planes).then(|| self.layout.offsets[plane])
    }

    pub fn plane_count(&self) -> usize {
        self.layout.planes
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn modifier(&self) -> u64 {
        DRM_FORMAT_MOD_INVALID
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// dma-buf descriptor of imported buffers.
    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    pub fn size(&self) -> u64 {
        self.layout.size
    }
}

pub(crate) fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > 16384 || height > 16384 {
        return Err(Error::AllocationFailure(format!(
            "invalid dimensions {}x{}",
            width, height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(0x3432_5258), Some(PixelFormat::Xrgb8888));
        assert_eq!(PixelFormat::from_fourcc(0x3231_564e), Some(PixelFormat::Nv12));
        assert_eq!(PixelFormat::from_fourcc(0xdead_beef), None);
    }

    #[test]
    fn test_nv12_layout_has_chroma_plane() {
        let layout = PlaneLayout::compute(PixelFormat::Nv12, 1080, 1088).unwrap();
        assert_eq!(layout.planes, 2);
        assert_eq!(layout.strides[0], 1088);
        assert_eq!(layout.strides[1], 1088);
        assert_eq!(layout.offsets[1], 1088 * 1080);
        assert_eq!(layout.size, 1088 * 1080 + 1088 * 540);
    }

    #[test]
    fn test_rgb565_stride_is_two_bytes_per_pixel() {
        let layout = PlaneLayout::compute(PixelFormat::Rgb565, 10, 64).unwrap();
        assert_eq!(layout.planes, 1);
        assert_eq!(layout.strides[0], 128);
        assert_eq!(layout.offsets[0], 0);
    }

    #[test]
    fn test_layout_overflow_is_an_allocation_failure() {
        assert!(matches!(
            PlaneLayout::compute(PixelFormat::Nv12, 16384, 1 << 20),
            Err(Error::AllocationFailure(_))
        ));
        assert!(matches!(
            PlaneLayout::compute(PixelFormat::Argb8888, 16, u32::MAX / 2),
            Err(Error::AllocationFailure(_))
        ));
    }

    #[test]
    fn test_scanout_usage_reaches_composer() {
        let usage = BufferUsage::SCANOUT | BufferUsage::RENDERING;
        let gralloc = usage.gralloc_usage();
        assert_ne!(gralloc & 0x0800, 0);
        assert_ne!(gralloc & 0x0200, 0);
        assert_eq!(gralloc & 0x0030, 0);
    }
}
