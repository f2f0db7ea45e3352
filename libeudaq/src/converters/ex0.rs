use crate::config::ConfigSpc;
use crate::converter::StdEventConverter;
use crate::error::ConvertError;
use crate::event::Event;
use crate::standard_event::{StandardEvent, StandardPlane};

pub const EX0_RAW: &str = "Ex0Raw";

/// Converter for the example producer's frames.
///
/// Every block is one plane: `[x_size: u8, y_size: u8, x_size*y_size pixel values]` in
/// row-major order. Pixels above the configured `Threshold` (default 0) become hits.
#[derive(Debug, Clone)]
pub struct Ex0RawConverter {
    threshold: u8,
}

impl Ex0RawConverter {
    pub fn new(conf: ConfigSpc) -> Self {
        let threshold = conf.map(|c| c.get("Threshold", 0u8)).unwrap_or(0);
        Self { threshold }
    }
}

impl StdEventConverter for Ex0RawConverter {
    fn converting(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError> {
        for block_n in src.block_num_list() {
            let block = src.get_block(block_n)?;
            let [x_size, y_size, pixels @ ..] = block else {
                return Err(ConvertError::Decode {
                    converter: EX0_RAW,
                    block: block_n,
                    reason: format!("block of {} bytes has no frame header", block.len()),
                });
            };
            let (x_size, y_size) = (*x_size as u32, *y_size as u32);
            if pixels.len() != (x_size * y_size) as usize {
                return Err(ConvertError::Decode {
                    converter: EX0_RAW,
                    block: block_n,
                    reason: format!(
                        "expected {}x{} pixels, found {}",
                        x_size,
                        y_size,
                        pixels.len()
                    ),
                });
            }

            let n_hits = pixels.iter().filter(|v| **v > self.threshold).count();
            let mut plane = StandardPlane::new(block_n, "Ex0", "Ex0");
            plane.set_size_zs(x_size, y_size, n_hits, 1, 0);
            for (i, value) in pixels.iter().enumerate() {
                if *value > self.threshold {
                    let i = i as u32;
                    plane.push_pixel(i % x_size, i / x_size, *value as f64, 0)?;
                }
            }
            dst.add_plane(plane)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Configuration;
    use crate::error::PlaneError;

    fn frame(x: u8, y: u8, values: &[u8]) -> Vec<u8> {
        let mut block = vec![x, y];
        block.extend_from_slice(values);
        block
    }

    #[test]
    fn test_one_plane_per_block() {
        let mut ev = Event::raw(EX0_RAW);
        ev.add_block(4, frame(2, 2, &[0, 5, 0, 7])).unwrap();
        ev.add_block(1, frame(3, 1, &[1, 0, 0])).unwrap();
        let mut dst = StandardEvent::new();
        Ex0RawConverter::new(None).converting(&ev, &mut dst).unwrap();
        assert_eq!(dst.num_planes(), 2);
        let plane = dst.plane_by_id(4).unwrap();
        let hits: Vec<(u32, u32, f64)> = plane
            .hits(0)
            .unwrap()
            .iter()
            .map(|h| (h.x, h.y, h.value))
            .collect();
        assert_eq!(hits, vec![(1, 0, 5.0), (1, 1, 7.0)]);
        assert_eq!(dst.plane(0).unwrap().id(), 1);
    }

    #[test]
    fn test_threshold_from_config() {
        let mut conf = Configuration::new();
        conf.set("Threshold", 5);
        let conv = Ex0RawConverter::new(Some(Arc::new(conf)));
        let mut ev = Event::raw(EX0_RAW);
        ev.add_block(0, frame(2, 1, &[5, 6])).unwrap();
        let mut dst = StandardEvent::new();
        conv.converting(&ev, &mut dst).unwrap();
        assert_eq!(dst.plane(0).unwrap().hit_pixels(0), 1);
    }

    #[test]
    fn test_bad_blocks() {
        let conv = Ex0RawConverter::new(None);
        let mut ev = Event::raw(EX0_RAW);
        ev.add_block(0, vec![2]).unwrap();
        let err = conv.converting(&ev, &mut StandardEvent::new()).unwrap_err();
        assert!(matches!(err, ConvertError::Decode { block: 0, .. }));

        let mut ev = Event::raw(EX0_RAW);
        ev.add_block(0, frame(2, 2, &[1, 2, 3])).unwrap();
        let err = conv.converting(&ev, &mut StandardEvent::new()).unwrap_err();
        assert!(matches!(err, ConvertError::Decode { block: 0, .. }));
    }

    #[test]
    fn test_duplicate_plane() {
        let conv = Ex0RawConverter::new(None);
        let mut ev = Event::raw(EX0_RAW);
        ev.add_block(0, frame(1, 1, &[1])).unwrap();
        let mut dst = StandardEvent::new();
        conv.converting(&ev, &mut dst).unwrap();
        let err = conv.converting(&ev, &mut dst).unwrap_err();
        assert_eq!(err, ConvertError::Plane(PlaneError::DuplicatePlane(0)));
    }
}
