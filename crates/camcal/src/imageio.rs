//! Conversions between encoded images (`image` crate) and the core buffers.

use crate::error::CalibError;
use camcal_core::{
    DistortionCoefficients, GrayImage, GrayImageView, ImageError, IntrinsicMatrix, UndistortMap,
    UndistortOptions,
};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Borrow an `image::GrayImage` as a core view.
pub fn gray_view(img: &image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

pub fn to_gray(img: &DynamicImage) -> Result<GrayImage, CalibError> {
    let luma = img.to_luma8();
    let (w, h) = (luma.width() as usize, luma.height() as usize);
    Ok(GrayImage::from_raw(w, h, luma.into_raw())?)
}

/// Decode any supported format into a grayscale frame.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, CalibError> {
    to_gray(&image::load_from_memory(bytes)?)
}

pub fn load_gray(path: impl AsRef<Path>) -> Result<GrayImage, CalibError> {
    to_gray(&image::open(path)?)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, CalibError> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Undistort a decoded image, keeping color when it has any.
pub fn undistort_dynamic(
    img: &DynamicImage,
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionCoefficients,
    options: &UndistortOptions,
) -> Result<DynamicImage, CalibError> {
    let (w, h) = (img.width(), img.height());
    let map = UndistortMap::new(w as usize, h as usize, intrinsics, distortion, options);
    let size_error = || ImageError::InvalidDimensions {
        width: w as usize,
        height: h as usize,
    };

    if img.color().has_color() {
        let rgb = img.to_rgb8();
        let data =
            map.remap_interleaved(rgb.as_raw(), w as usize, h as usize, 3, options.border)?;
        let out = image::RgbImage::from_raw(w, h, data).ok_or_else(size_error)?;
        Ok(DynamicImage::ImageRgb8(out))
    } else {
        let luma = img.to_luma8();
        let out = map.remap_gray(&gray_view(&luma), options.border)?;
        let out = image::GrayImage::from_raw(w, h, out.data).ok_or_else(size_error)?;
        Ok(DynamicImage::ImageLuma8(out))
    }
}

/// Decode, undistort and re-encode as PNG.
pub fn undistort_encoded(
    bytes: &[u8],
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionCoefficients,
    options: &UndistortOptions,
) -> Result<Vec<u8>, CalibError> {
    let img = image::load_from_memory(bytes)?;
    let corrected = undistort_dynamic(&img, intrinsics, distortion, options)?;
    encode_png(&corrected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_of(img: DynamicImage) -> Vec<u8> {
        encode_png(&img).expect("encode")
    }

    #[test]
    fn decode_keeps_dimensions() {
        let img = image::GrayImage::from_fn(20, 10, |x, y| image::Luma([(x + y) as u8]));
        let gray = decode_gray(&png_of(DynamicImage::ImageLuma8(img.clone()))).expect("decode");
        assert_eq!((gray.width, gray.height), (20, 10));
        assert_eq!(gray.data, img.into_raw());
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            decode_gray(b"definitely not an image"),
            Err(CalibError::Codec(_))
        ));
    }

    #[test]
    fn color_stays_color() {
        let img = image::RgbImage::from_fn(16, 12, |x, y| {
            image::Rgb([x as u8 * 10, y as u8 * 10, 200])
        });
        let k = IntrinsicMatrix::new(20.0, 20.0, 7.5, 5.5);
        let bytes = undistort_encoded(
            &png_of(DynamicImage::ImageRgb8(img.clone())),
            &k,
            &DistortionCoefficients::zero(),
            &UndistortOptions::default(),
        )
        .expect("undistort");
        let back = image::load_from_memory(&bytes).expect("decode");
        assert!(back.color().has_color());
        assert_eq!(back.to_rgb8(), img);
    }

    #[test]
    fn gray_stays_gray() {
        let img = image::GrayImage::from_fn(16, 12, |x, _| image::Luma([x as u8 * 12]));
        let k = IntrinsicMatrix::new(20.0, 20.0, 7.5, 5.5);
        let bytes = undistort_encoded(
            &png_of(DynamicImage::ImageLuma8(img.clone())),
            &k,
            &DistortionCoefficients::zero(),
            &UndistortOptions::default(),
        )
        .expect("undistort");
        let back = image::load_from_memory(&bytes).expect("decode");
        assert!(!back.color().has_color());
        assert_eq!(back.to_luma8(), img);
    }
}
