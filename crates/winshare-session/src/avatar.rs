use std::fmt;

/// A decoded peer avatar, as straight RGBA pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct Avatar {
    pub width: u32,
    pub height: u32,
    /// Row-major, 4 bytes per pixel.
    pub rgba: Vec<u8>,
}

impl fmt::Debug for Avatar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Avatar")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Decode an AVATAR body (PNG or JPEG).
pub fn decode_avatar(bytes: &[u8]) -> Result<Avatar, image::ImageError> {
    let image = image::load_from_memory(bytes)?.into_rgba8();
    Ok(Avatar {
        width: image.width(),
        height: image.height(),
        rgba: image.into_raw(),
    })
}
