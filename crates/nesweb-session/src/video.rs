use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Native NES output resolution.
pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 240;

/// Channel order of the engine's packed 32-bit pixels.
///
/// This is configuration, not auto-detected: engine builds disagree and the
/// frame buffer carries no marker saying which one it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelLayout {
    /// `0x??BBGGRR`: red in the lowest byte.
    #[default]
    RedLow,
    /// `0x??RRGGBB`: red in bits 16..24.
    RedHigh,
}

impl PixelLayout {
    /// Unpacks one pixel into `[r, g, b]`.
    #[inline]
    pub const fn unpack(self, pixel: u32) -> [u8; 3] {
        let low = pixel as u8;
        let mid = (pixel >> 8) as u8;
        let high = (pixel >> 16) as u8;
        match self {
            PixelLayout::RedLow => [low, mid, high],
            PixelLayout::RedHigh => [high, mid, low],
        }
    }
}

/// Final destination of rendered frames (a canvas, a window, a test probe).
///
/// Scaling to the display size happens here, with nearest-neighbour
/// filtering so pixels stay sharp.
pub trait Presenter {
    fn present(&mut self, rgba: &[u8], width: usize, height: usize);
}

/// Presenter that drops every frame, for headless sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _rgba: &[u8], _width: usize, _height: usize) {}
}

/// Converts the engine's packed frame buffer into an RGBA8888 image.
///
/// The image is allocated once at construction and rewritten in place for
/// every frame.
#[derive(Debug)]
pub struct VideoSink {
    layout: PixelLayout,
    width: usize,
    height: usize,
    image: Box<[u8]>,
    frames_rendered: u64,
}

impl VideoSink {
    pub fn new(width: usize, height: usize, layout: PixelLayout) -> Self {
        Self {
            layout,
            width,
            height,
            image: vec![0; width * height * 4].into_boxed_slice(),
            frames_rendered: 0,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Last rendered image (RGBA, row-major, no padding).
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Renders one frame. A frame of the wrong size is rejected and the
    /// previous image is kept.
    pub fn render(&mut self, frame: &[u32]) -> Result<&[u8], SessionError> {
        if frame.len() != self.pixel_count() {
            return Err(SessionError::FrameSizeMismatch {
                expected: self.pixel_count(),
                actual: frame.len(),
            });
        }

        let layout = self.layout;
        for (dst, &pixel) in self.image.chunks_exact_mut(4).zip(frame) {
            let [r, g, b] = layout.unpack(pixel);
            dst[0] = r;
            dst[1] = g;
            dst[2] = b;
            dst[3] = 0xFF;
        }
        self.frames_rendered += 1;
        Ok(&self.image)
    }

    /// Blanks the image (opaque black) without counting a frame.
    pub fn clear(&mut self) {
        for px in self.image.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 0xFF]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn red_low_layout_reads_red_from_lowest_byte() {
        let mut sink = VideoSink::new(2, 1, PixelLayout::RedLow);
        let image = sink.render(&[0x0033_2211, 0xFF00_00FF]).unwrap();
        assert_eq!(image, &[0x11, 0x22, 0x33, 0xFF, 0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn red_high_layout_reads_red_from_third_byte() {
        let mut sink = VideoSink::new(2, 1, PixelLayout::RedHigh);
        let image = sink.render(&[0x0011_2233, 0x00FF_0000]).unwrap();
        assert_eq!(image, &[0x11, 0x22, 0x33, 0xFF, 0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn wrong_sized_frame_is_rejected_and_image_kept() {
        let mut sink = VideoSink::new(2, 2, PixelLayout::RedLow);
        sink.render(&[0x00FF_FFFF; 4]).unwrap();

        let err = sink.render(&[0; 3]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::FrameSizeMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(sink.frames_rendered(), 1);
        assert!(sink.image().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn clear_blanks_to_opaque_black() {
        let mut sink = VideoSink::new(1, 1, PixelLayout::RedLow);
        sink.render(&[0x00AB_CDEF]).unwrap();
        sink.clear();
        assert_eq!(sink.image(), &[0, 0, 0, 0xFF]);
    }

    proptest! {
        #[test]
        fn alpha_is_always_opaque_and_layouts_mirror(pixel in any::<u32>()) {
            let [r, g, b] = PixelLayout::RedLow.unpack(pixel);
            let [r2, g2, b2] = PixelLayout::RedHigh.unpack(pixel);
            prop_assert_eq!((r, g, b), (b2, g2, r2));

            let mut sink = VideoSink::new(1, 1, PixelLayout::RedHigh);
            let image = sink.render(&[pixel]).unwrap();
            prop_assert_eq!(image[3], 0xFF);
        }
    }
}
