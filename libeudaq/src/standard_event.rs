//! The normalized, detector independent output of conversion.
//!
//! A [`StandardEvent`] is a flat list of [`StandardPlane`]s, each holding per-frame pixel
//! hits in plane-local raw pixel units. Converters build planes, the dispatcher appends
//! them in sub-event order.
use std::fmt;

use super::constants::*;
use super::error::PlaneError;
use super::event::Event;
use super::tags::{TagStore, TagValue};

/// A single pixel hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub x: u32,
    pub y: u32,
    pub value: f64,
    /// Optional hit time in picoseconds.
    pub time_ps: Option<u64>,
    pub pivot: bool,
}

impl Hit {
    pub fn new(x: u32, y: u32, value: f64) -> Self {
        Self {
            x,
            y,
            value,
            time_ps: None,
            pivot: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandardPlane {
    id: u32,
    type_name: String,
    sensor: String,
    flags: u32,
    x_size: u32,
    y_size: u32,
    pivot_pixel: u32,
    frames: Vec<Vec<Hit>>,
}

impl StandardPlane {
    pub fn new(id: u32, type_name: &str, sensor: &str) -> Self {
        Self {
            id,
            type_name: type_name.to_string(),
            sensor: sensor.to_string(),
            flags: 0,
            x_size: 0,
            y_size: 0,
            pivot_pixel: 0,
            frames: Vec::new(),
        }
    }

    /// Size the plane as zero-suppressed: `frames` empty frames, each with room for
    /// `hit_hint` hits. Extra `flags` are or-ed in next to ZS.
    pub fn set_size_zs(&mut self, width: u32, height: u32, hit_hint: usize, frames: u32, flags: u32) {
        self.x_size = width;
        self.y_size = height;
        self.flags = flags | PLANE_FLAG_ZS;
        self.frames = (0..frames.max(1))
            .map(|_| Vec::with_capacity(hit_hint))
            .collect();
    }

    /// Size the plane as a dense readout: every frame holds `width*height` pixels in
    /// row-major order, initialised to zero.
    pub fn set_size_raw(
        &mut self,
        width: u32,
        height: u32,
        frames: u32,
        flags: u32,
    ) -> Result<(), PlaneError> {
        let n_pixels = width
            .checked_mul(height)
            .ok_or(PlaneError::TooManyPixels(width, height))?;
        self.x_size = width;
        self.y_size = height;
        self.flags = flags & !PLANE_FLAG_ZS;
        let dense: Vec<Hit> = (0..n_pixels)
            .map(|i| Hit::new(i % width.max(1), i / width.max(1), 0.0))
            .collect();
        self.frames = vec![dense; frames.max(1) as usize];
        Ok(())
    }

    fn frame_mut(&mut self, frame: u32) -> Result<&mut Vec<Hit>, PlaneError> {
        let n_frames = self.frames.len() as u32;
        self.frames
            .get_mut(frame as usize)
            .ok_or(PlaneError::BadFrame(frame, n_frames))
    }

    /// Append a hit to a frame. Duplicate coordinates are kept as separate hits.
    pub fn push_pixel(&mut self, x: u32, y: u32, value: f64, frame: u32) -> Result<(), PlaneError> {
        self.push_hit(Hit::new(x, y, value), frame)
    }

    /// Append a fully specified hit to a frame.
    pub fn push_hit(&mut self, hit: Hit, frame: u32) -> Result<(), PlaneError> {
        if hit.pivot {
            self.flags |= PLANE_FLAG_WITHPIVOT;
        }
        self.frame_mut(frame)?.push(hit);
        Ok(())
    }

    /// Overwrite the value of pixel `index` of a dense frame.
    pub fn set_pixel(&mut self, index: usize, value: f64, frame: u32) -> Result<(), PlaneError> {
        let pixels = self.frame_mut(frame)?;
        let n_pixels = pixels.len();
        let pixel = pixels
            .get_mut(index)
            .ok_or(PlaneError::BadPixelIndex(index, n_pixels))?;
        pixel.value = value;
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags |= flags;
    }

    pub fn is_zs(&self) -> bool {
        self.flags & PLANE_FLAG_ZS != 0
    }

    pub fn x_size(&self) -> u32 {
        self.x_size
    }

    pub fn y_size(&self) -> u32 {
        self.y_size
    }

    pub fn total_pixels(&self) -> u64 {
        self.x_size as u64 * self.y_size as u64
    }

    pub fn num_frames(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn pivot_pixel(&self) -> u32 {
        self.pivot_pixel
    }

    pub fn set_pivot_pixel(&mut self, pivot: u32) {
        self.pivot_pixel = pivot;
        self.flags |= PLANE_FLAG_WITHPIVOT;
    }

    /// -1 for planes read out with negative polarity, otherwise 1.
    pub fn polarity(&self) -> i32 {
        if self.flags & PLANE_FLAG_NEGATIVE != 0 {
            -1
        } else {
            1
        }
    }

    /// Number of pixels stored in a frame: hits for ZS planes, every pixel for dense ones.
    pub fn hit_pixels(&self, frame: u32) -> usize {
        self.frames.get(frame as usize).map(Vec::len).unwrap_or(0)
    }

    pub fn hits(&self, frame: u32) -> Result<&[Hit], PlaneError> {
        self.frames
            .get(frame as usize)
            .map(Vec::as_slice)
            .ok_or(PlaneError::BadFrame(frame, self.frames.len() as u32))
    }

    /// Hits of every frame, tagged with their frame index.
    pub fn all_hits(&self) -> impl Iterator<Item = (u32, &Hit)> {
        self.frames
            .iter()
            .enumerate()
            .flat_map(|(f, hits)| hits.iter().map(move |h| (f as u32, h)))
    }
}

impl fmt::Display for StandardPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StandardPlane {} ({}, {}) {}x{}x{}{}, {} hits",
            self.id,
            self.type_name,
            self.sensor,
            self.x_size,
            self.y_size,
            self.frames.len(),
            if self.is_zs() { " ZS" } else { "" },
            self.frames.iter().map(Vec::len).sum::<usize>()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardEvent {
    run_n: u32,
    event_n: u32,
    trigger_n: u32,
    timestamp_begin: u64,
    timestamp_end: u64,
    flag: u32,
    identified: bool,
    description: String,
    tags: TagStore,
    planes: Vec<StandardPlane>,
}

impl StandardEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the identity of `src` unless an earlier event already provided it. Trigger
    /// number and timestamps are taken only if not yet flagged as set.
    pub fn adopt_identity(&mut self, src: &Event) {
        if !self.identified {
            self.run_n = src.run_n();
            self.event_n = src.event_n();
            self.description = src.description().to_string();
            self.flag |= src.flag() & (FLAG_BORE | FLAG_EORE | FLAG_PACK);
            self.identified = true;
        }
        if src.is_flag_trigger() && !self.is_flag_trigger() {
            self.set_trigger_n(src.trigger_n());
        }
        if src.is_flag_timestamp() && !self.is_flag_timestamp() {
            self.set_timestamp(src.timestamp_begin(), src.timestamp_end());
        }
    }

    pub fn run_n(&self) -> u32 {
        self.run_n
    }

    pub fn set_run_n(&mut self, run_n: u32) {
        self.run_n = run_n;
    }

    pub fn event_n(&self) -> u32 {
        self.event_n
    }

    pub fn set_event_n(&mut self, event_n: u32) {
        self.event_n = event_n;
    }

    pub fn trigger_n(&self) -> u32 {
        self.trigger_n
    }

    pub fn set_trigger_n(&mut self, trigger_n: u32) {
        self.trigger_n = trigger_n;
        self.flag |= FLAG_TRIG;
    }

    pub fn timestamp_begin(&self) -> u64 {
        self.timestamp_begin
    }

    pub fn timestamp_end(&self) -> u64 {
        self.timestamp_end
    }

    pub fn set_timestamp(&mut self, begin: u64, end: u64) {
        self.timestamp_begin = begin;
        self.timestamp_end = end;
        self.flag |= FLAG_TIME;
    }

    pub fn flag(&self) -> u32 {
        self.flag
    }

    pub fn clear_flag_bit(&mut self, bit: u32) {
        self.flag &= !bit;
    }

    pub fn is_flag_packet(&self) -> bool {
        self.flag & FLAG_PACK != 0
    }

    pub fn is_flag_trigger(&self) -> bool {
        self.flag & FLAG_TRIG != 0
    }

    pub fn is_flag_timestamp(&self) -> bool {
        self.flag & FLAG_TIME != 0
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    pub fn set_tag<T: fmt::Display>(&mut self, key: &str, value: T) {
        self.tags.set(key, value);
    }

    pub fn tag<T: TagValue>(&self, key: &str, default: T) -> T {
        self.tags.get(key, default)
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.has(key)
    }

    /// Append a plane. Plane ids are unique within one event.
    pub fn add_plane(&mut self, plane: StandardPlane) -> Result<&mut StandardPlane, PlaneError> {
        if self.planes.iter().any(|p| p.id == plane.id) {
            return Err(PlaneError::DuplicatePlane(plane.id));
        }
        self.planes.push(plane);
        let last = self.planes.len() - 1;
        Ok(&mut self.planes[last])
    }

    pub fn planes(&self) -> &[StandardPlane] {
        &self.planes
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Option<&StandardPlane> {
        self.planes.get(index)
    }

    pub fn plane_by_id(&self, id: u32) -> Option<&StandardPlane> {
        self.planes.iter().find(|p| p.id == id)
    }

    /// Drop every plane past the first `len`.
    pub fn truncate_planes(&mut self, len: usize) {
        self.planes.truncate(len);
    }
}

impl fmt::Display for StandardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "StandardEvent run {} event {} trigger {} time {}..{}, {} planes",
            self.run_n,
            self.event_n,
            self.trigger_n,
            self.timestamp_begin,
            self.timestamp_end,
            self.planes.len()
        )?;
        for (k, v) in self.tags.iter() {
            writeln!(f, "  {k}={v}")?;
        }
        for plane in self.planes.iter() {
            writeln!(f, "  {plane}")?;
        }
        Ok(())
    }
}
