use image::DynamicImage;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::{DalleError, Result};
use crate::types::UnitId;

/// PNG text keyword holding the prompt as typed.
pub const PROMPT_KEY: &str = "prompt";
/// PNG text keyword holding the provider's rewritten prompt.
pub const REVISED_PROMPT_KEY: &str = "revised_prompt";

/// A delivered image together with both prompts and its destination path.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub unit_id: UnitId,
    pub prompt: String,
    pub revised_prompt: String,
    pub image: DynamicImage,
    pub path: PathBuf,
}

impl Artifact {
    /// Write the image to [`path`](Self::path) as PNG with the prompts embedded.
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.path)
    }

    /// Write the image as PNG to an arbitrary location.
    ///
    /// Text that fits Latin-1 goes into `tEXt` chunks, anything else into
    /// UTF-8 `iTXt` chunks.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let rgba = self.image.to_rgba8();
        let writer = BufWriter::new(File::create(path)?);

        let mut encoder = png::Encoder::new(writer, rgba.width(), rgba.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        add_text(&mut encoder, PROMPT_KEY, &self.prompt)?;
        add_text(&mut encoder, REVISED_PROMPT_KEY, &self.revised_prompt)?;

        let mut png_writer = encoder.write_header().map_err(encoding_error)?;
        png_writer
            .write_image_data(rgba.as_raw())
            .map_err(encoding_error)?;
        png_writer.finish().map_err(encoding_error)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(unit_id = %self.unit_id, "Saved to {}", name);
        Ok(())
    }
}

fn add_text<W: std::io::Write>(
    encoder: &mut png::Encoder<'_, W>,
    keyword: &str,
    text: &str,
) -> Result<()> {
    let added = if text.chars().all(|c| (c as u32) < 0x100) {
        encoder.add_text_chunk(keyword.to_string(), text.to_string())
    } else {
        encoder.add_itxt_chunk(keyword.to_string(), text.to_string())
    };
    added.map_err(encoding_error)
}

fn encoding_error(err: png::EncodingError) -> DalleError {
    match err {
        png::EncodingError::IoError(e) => DalleError::Io(e),
        other => DalleError::Encoding(other.to_string()),
    }
}
