use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use dotmatrix_core::hardware::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Expands 0x00RRGGBB pixels into packed RGB bytes.
pub fn frame_to_rgb(frame: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; frame.len() * 3];
    for (i, &px) in frame.iter().enumerate() {
        out[i * 3] = ((px >> 16) & 0xFF) as u8;
        out[i * 3 + 1] = ((px >> 8) & 0xFF) as u8;
        out[i * 3 + 2] = (px & 0xFF) as u8;
    }
    out
}

/// Writes a 160x144 front buffer as an 8-bit RGB PNG.
pub fn write_png(path: &Path, frame: &[u32]) -> Result<(), png::EncodingError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let w = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(w, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&frame_to_rgb(frame))?;
    writer.finish()?;
    log::info!("wrote screenshot {}", path.display());
    Ok(())
}
