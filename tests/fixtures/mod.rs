//! Test images

use std::io::Cursor;

/// Small valid PNG filled with one colour.
pub fn page_png(shade: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 12, image::Rgb([shade, shade, shade]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode fixture png");
    out
}
