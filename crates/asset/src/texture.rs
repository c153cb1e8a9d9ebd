//! Texture loading and data structures.
//! Images are decoded to RGBA8 on the CPU; `format` is the storage the
//! GPU side is asked to use.

use std::{
    fs::File,
    io::{BufRead, BufReader, Seek},
    path::{Path, PathBuf},
};

use image::ImageReader;

use crate::error::{AssetError, AssetResult};

/// Integer rectangle, `min` inclusive and `max` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub min: [u32; 2],
    pub max: [u32; 2],
}

impl Rect {
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self {
            min: [0, 0],
            max: [width, height],
        }
    }

    pub const fn width(&self) -> u32 {
        self.max[0] - self.min[0]
    }

    pub const fn height(&self) -> u32 {
        self.max[1] - self.min[1]
    }
}

/// Texture sampling filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    /// Trilinear.
    LinearMipmapLinear,
}

impl Filter {
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, Filter::Nearest | Filter::Linear)
    }
}

/// GPU storage formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Rgb8,
    Dxt1,
    Dxt1Rgba,
    Dxt3,
    Dxt5,
}

impl TextureFormat {
    pub fn is_compressed(self) -> bool {
        !matches!(self, TextureFormat::Rgba8 | TextureFormat::Rgb8)
    }
}

/// Filtering and format every loaded texture gets.
pub const DEFAULT_MIN_FILTER: Filter = Filter::LinearMipmapLinear;
pub const DEFAULT_MAG_FILTER: Filter = Filter::Linear;
pub const DEFAULT_FORMAT: TextureFormat = TextureFormat::Dxt1Rgba;

/// Decoded texture ready for upload.
#[derive(Clone, Debug)]
pub struct Texture {
    /// Tightly packed RGBA8 pixels, row-major.
    pub data: Vec<u8>,
    pub bounds: Rect,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub format: TextureFormat,
}

impl Texture {
    /// Wrap RGBA8 pixels with the default filtering and format.
    pub fn new_rgba8(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            (width * height * 4) as usize,
            "Data size doesn't match RGBA8 format"
        );
        Self {
            data,
            bounds: Rect::from_size(width, height),
            min_filter: DEFAULT_MIN_FILTER,
            mag_filter: DEFAULT_MAG_FILTER,
            format: DEFAULT_FORMAT,
        }
    }

    /// White/gray checkerboard with 8px cells.
    pub fn checkerboard(size: u32) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let checker = ((x / 8) + (y / 8)) % 2;
                if checker == 0 {
                    data.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    data.extend_from_slice(&[128, 128, 128, 255]);
                }
            }
        }

        Self::new_rgba8(size, size, data)
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    pub fn is_valid(&self) -> bool {
        let expected = (self.width() * self.height() * 4) as usize;
        self.data.len() == expected && self.width() > 0 && self.height() > 0
    }
}

/// Open and decode an image file.
pub fn load_texture(path: impl AsRef<Path>) -> AssetResult<Texture> {
    let path = path.as_ref();
    log::info!("Loading texture from {:?}", path);

    let file = File::open(path).map_err(|e| AssetError::io(path, e))?;
    let texture = decode(BufReader::new(file), path)?;

    log::info!(
        "Loaded texture {}x{} with {} bytes",
        texture.width(),
        texture.height(),
        texture.data.len()
    );
    Ok(texture)
}

/// Decode an image from any seekable reader; the format is sniffed from
/// the content.
pub fn load_texture_from_reader<R: BufRead + Seek>(reader: R) -> AssetResult<Texture> {
    decode(reader, Path::new("<reader>"))
}

fn decode<R: BufRead + Seek>(reader: R, path: &Path) -> AssetResult<Texture> {
    let img = ImageReader::new(reader)
        .with_guessed_format()
        .map_err(|e| AssetError::io(PathBuf::from(path), e))?
        .decode()
        .map_err(|e| AssetError::decode(path, e))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Texture::new_rgba8(width, height, rgba.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_2x2_png(path: &Path) {
        let img = image::RgbaImage::from_raw(
            2,
            2,
            vec![
                255, 0, 0, 255, 0, 255, 0, 255, //
                0, 0, 255, 255, 255, 255, 255, 0,
            ],
        )
        .unwrap();
        img.save(path).unwrap();
    }

    #[test]
    fn loads_2x2_png_with_fixed_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixels.png");
        write_2x2_png(&path);

        let tex = load_texture(&path).expect("load png");
        assert_eq!(tex.bounds, Rect { min: [0, 0], max: [2, 2] });
        assert_eq!(tex.min_filter, Filter::LinearMipmapLinear);
        assert_eq!(tex.mag_filter, Filter::Linear);
        assert_eq!(tex.format, TextureFormat::Dxt1Rgba);
        assert!(tex.is_valid());
        assert_eq!(&tex.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&tex.data[12..16], &[255, 255, 255, 0]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_texture(dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }

    #[test]
    fn garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nthis is not a png").unwrap();
        let err = load_texture(&path).unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }

    #[test]
    fn decodes_from_memory() {
        let mut bytes = Vec::new();
        image::RgbaImage::from_pixel(3, 1, image::Rgba([1, 2, 3, 4]))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let tex = load_texture_from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(tex.width(), 3);
        assert_eq!(tex.height(), 1);
    }

    #[test]
    fn checkerboard_is_valid() {
        let tex = Texture::checkerboard(16);
        assert!(tex.is_valid());
        assert_eq!(&tex.data[0..4], &[255, 255, 255, 255]);
        assert_eq!(&tex.data[8 * 4..8 * 4 + 4], &[128, 128, 128, 255]);
    }

    #[test]
    fn default_formats_describe_themselves() {
        assert!(DEFAULT_FORMAT.is_compressed());
        assert!(DEFAULT_MIN_FILTER.uses_mipmaps());
        assert!(!DEFAULT_MAG_FILTER.uses_mipmaps());
    }
}
