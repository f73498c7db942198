//! Decoded textures and their GPU counterparts.
//!
//! [`Texture`] is the CPU-side pixel buffer that the scene owns and the
//! binary cache persists. [`GpuTexture`] wraps the WGPU texture objects the
//! wgpu backend creates from it, plus the depth textures used as shadow maps
//! and depth buffers.

use image::GenericImageView;

/// Channel layout of a decoded pixel buffer.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelMode {
    Rgb = 0,
    Rgba = 1,
}

impl PixelMode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PixelMode::Rgb),
            1 => Some(PixelMode::Rgba),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelMode::Rgb => 3,
            PixelMode::Rgba => 4,
        }
    }
}

/// A decoded image: tightly packed rows, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub mode: PixelMode,
    pub pixels: Vec<u8>,
}

impl Texture {
    pub fn new(width: u32, height: u32, mode: PixelMode, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bpp: mode.bytes_per_pixel(),
            mode,
            pixels,
        }
    }

    /// A single opaque white pixel.
    pub fn blank() -> Self {
        Self::new(1, 1, PixelMode::Rgba, vec![255; 4])
    }

    /// Keep RGB images as RGB and store everything with an alpha channel as RGBA.
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        if img.color().has_alpha() {
            Self::new(width, height, PixelMode::Rgba, img.to_rgba8().into_raw())
        } else {
            Self::new(width, height, PixelMode::Rgb, img.to_rgb8().into_raw())
        }
    }

    /// `width * height * bpp`, the size the pixel buffer is expected to have.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bpp as usize
    }

    /// The pixels as RGBA8, expanding RGB with an opaque alpha channel.
    pub fn to_rgba8(&self) -> Vec<u8> {
        match self.mode {
            PixelMode::Rgba => self.pixels.clone(),
            PixelMode::Rgb => self
                .pixels
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
        }
    }
}

/// A GPU texture with a view and a sampler suited to how it is read.
#[derive(Clone, Debug)]
pub struct GpuTexture {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

impl GpuTexture {
    /// Standard depth buffer texture format (32-bit float).
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Create a depth texture that can be rendered into and sampled with a comparison sampler.
    ///
    /// Shadow maps and the screen depth buffer both use this. Lookups outside the
    /// texture clamp to the edge so geometry beyond the light's frustum stays lit.
    pub fn create_depth_texture(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        let width = size[0].max(1);
        let height = size[1].max(1);
        let desc = wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[Self::DEPTH_FORMAT],
        };
        let texture = device.create_texture(&desc);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            lod_min_clamp: 0.0,
            lod_max_clamp: 100.0,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            width,
            height,
        }
    }

    /// Upload a decoded texture as sRGB RGBA8.
    pub fn from_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &Texture,
        label: &str,
    ) -> Self {
        let width = source.width.max(1);
        let height = source.height.max(1);
        let mut rgba = source.to_rgba8();
        // A short pixel buffer would make write_texture fail validation.
        rgba.resize(width as usize * height as usize * 4, 255);

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            &rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_default_sampler(device);
        Self {
            texture,
            view,
            sampler,
            width,
            height,
        }
    }
}

pub fn create_default_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Linear,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_images_stay_rgb() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            2,
            1,
            image::Rgb([10, 20, 30]),
        ));
        let texture = Texture::from_image(&img);
        assert_eq!(texture.mode, PixelMode::Rgb);
        assert_eq!(texture.bpp, 3);
        assert_eq!(texture.byte_len(), 6);
        assert_eq!(texture.pixels, vec![10, 20, 30, 10, 20, 30]);
    }

    #[test]
    fn rgb_expands_to_opaque_rgba() {
        let texture = Texture::new(2, 1, PixelMode::Rgb, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(texture.to_rgba8(), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn blank_is_one_white_pixel() {
        let blank = Texture::blank();
        assert_eq!((blank.width, blank.height, blank.bpp), (1, 1, 4));
        assert_eq!(blank.pixels, vec![255; 4]);
    }

    #[test]
    fn pixel_mode_tags_round_trip() {
        assert_eq!(PixelMode::from_raw(PixelMode::Rgb as i32), Some(PixelMode::Rgb));
        assert_eq!(PixelMode::from_raw(PixelMode::Rgba as i32), Some(PixelMode::Rgba));
        assert_eq!(PixelMode::from_raw(7), None);
    }
}
