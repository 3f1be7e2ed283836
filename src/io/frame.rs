//! Frame type handed from the frame source to the engine.

/// One timestamped grayscale sample, already photometrically corrected.
///
/// Pixel values are irradiance on a 0..255 scale, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    /// Seconds.
    pub timestamp: f64,
    /// Exposure time in milliseconds (0 when unknown).
    pub exposure: f32,
    pub width: u32,
    pub height: u32,
    pub image: Vec<f32>,
}

impl Frame {
    /// A black frame, used when decoding fails so the loop keeps going.
    pub fn empty(index: usize, timestamp: f64, width: u32, height: u32) -> Self {
        Self {
            index,
            timestamp,
            exposure: 0.0,
            width,
            height,
            image: vec![0.0; width as usize * height as usize],
        }
    }

    /// Pixel value at integer coordinates, `None` outside the image.
    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> Option<f32> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        self.image
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Clamp to 8 bit, for display and dumps.
    pub fn to_luma8(image: &[f32]) -> Vec<u8> {
        image
            .iter()
            .map(|v| v.round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_bounds() {
        let mut frame = Frame::empty(0, 0.0, 3, 2);
        frame.image[4] = 9.0;
        assert_eq!(frame.pixel(1, 1), Some(9.0));
        assert_eq!(frame.pixel(3, 0), None);
        assert_eq!(frame.pixel(0, -1), None);
    }

    #[test]
    fn test_to_luma8_clamps() {
        assert_eq!(Frame::to_luma8(&[-4.0, 12.4, 300.0]), vec![0, 12, 255]);
    }
}
