//! Timestamp queries and non-blocking readbacks
//!
//! Results are mapped asynchronously and collected on a later frame. The
//! frame loop never waits for the GPU to report timings or counters.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use umbra_render::PassId;

/// Two timestamps per pass
pub const QUERY_COUNT: u32 = PassId::COUNT as u32 * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Pending,
    Mapped,
    Failed,
}

/// Host-visible buffer mapped without waiting
pub struct ReadbackSlot {
    buffer: wgpu::Buffer,
    size: u64,
    state: Arc<Mutex<SlotState>>,
}

impl ReadbackSlot {
    pub fn new(device: &wgpu::Device, label: &str, size: u64) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            size,
            state: Arc::new(Mutex::new(SlotState::Idle)),
        }
    }

    /// Free for a new copy
    pub fn is_idle(&self) -> bool {
        *self.state.lock() == SlotState::Idle
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Start mapping; the copy into the slot must already be submitted
    pub fn request(&self) {
        *self.state.lock() = SlotState::Pending;
        let state = Arc::clone(&self.state);
        self.buffer.slice(..).map_async(wgpu::MapMode::Read, move |r| {
            *state.lock() = if r.is_ok() { SlotState::Mapped } else { SlotState::Failed };
        });
    }

    /// Contents of a finished mapping; the slot becomes idle again
    pub fn take(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Mapped => {
                let bytes = self.buffer.slice(..).get_mapped_range().to_vec();
                self.buffer.unmap();
                *state = SlotState::Idle;
                Some(bytes)
            }
            SlotState::Failed => {
                log::warn!("Readback mapping failed");
                *state = SlotState::Idle;
                None
            }
            SlotState::Idle | SlotState::Pending => None,
        }
    }
}

/// Timings of a finished frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerResult {
    pub passes: Vec<(PassId, Duration)>,
    pub total: Option<Duration>,
}

/// Per-pass GPU timestamps
pub struct PassTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: ReadbackSlot,
    period_ns: f32,
    recorded: Vec<PassId>,
    in_flight: Vec<PassId>,
}

impl PassTimer {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let size = QUERY_COUNT as u64 * 8;
        Self {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("pass_timestamps"),
                ty: wgpu::QueryType::Timestamp,
                count: QUERY_COUNT,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_resolve"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: ReadbackSlot::new(device, "timestamp_readback", size),
            period_ns: queue.get_timestamp_period(),
            recorded: Vec::with_capacity(PassId::COUNT),
            in_flight: Vec::new(),
        }
    }

    pub fn begin_frame(&mut self) {
        self.recorded.clear();
    }

    pub fn query_set(&self) -> &wgpu::QuerySet {
        &self.query_set
    }

    /// Claim the begin/end query pair for `pass`
    pub fn next_pair(&mut self, pass: PassId) -> Option<(u32, u32)> {
        let i = self.recorded.len() as u32;
        if i * 2 + 2 > QUERY_COUNT {
            return None;
        }
        self.recorded.push(pass);
        Some((i * 2, i * 2 + 1))
    }

    /// Resolve this frame's queries; returns whether a readback was recorded
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) -> bool {
        if self.recorded.is_empty() || !self.readback.is_idle() {
            return false;
        }
        let count = self.recorded.len() as u32 * 2;
        encoder.resolve_query_set(&self.query_set, 0..count, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, self.readback.buffer(), 0, count as u64 * 8);
        true
    }

    /// Call after the frame is submitted
    pub fn submitted(&mut self, resolved: bool) {
        if resolved {
            self.in_flight = std::mem::take(&mut self.recorded);
            self.readback.request();
        }
    }

    /// Timings of an earlier frame, if they have arrived
    pub fn collect(&mut self) -> Option<TimerResult> {
        let bytes = self.readback.take()?;
        let ticks: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        Some(timings(&self.in_flight, &ticks, self.period_ns))
    }
}

/// Convert raw timestamp pairs to durations
pub fn timings(passes: &[PassId], ticks: &[u64], period_ns: f32) -> TimerResult {
    let to_duration = |begin: u64, end: u64| {
        Duration::from_nanos((end.saturating_sub(begin) as f64 * period_ns as f64) as u64)
    };
    let passes_out: Vec<(PassId, Duration)> = passes
        .iter()
        .enumerate()
        .filter_map(|(i, pass)| {
            let (b, e) = (*ticks.get(i * 2)?, *ticks.get(i * 2 + 1)?);
            Some((*pass, to_duration(b, e)))
        })
        .collect();
    let total = if passes.is_empty() {
        None
    } else {
        match (ticks.first(), ticks.get(passes.len() * 2 - 1)) {
            (Some(b), Some(e)) => Some(to_duration(*b, *e)),
            _ => None,
        }
    };
    TimerResult {
        passes: passes_out,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timings_from_ticks() {
        let passes = [PassId::DepthTextureGeneration, PassId::ShadowTest];
        let ticks = [100, 300, 400, 1000];
        let r = timings(&passes, &ticks, 2.0);
        assert_eq!(r.passes[0], (PassId::DepthTextureGeneration, Duration::from_nanos(400)));
        assert_eq!(r.passes[1], (PassId::ShadowTest, Duration::from_nanos(1200)));
        assert_eq!(r.total, Some(Duration::from_nanos(1800)));
    }

    #[test]
    fn test_timings_empty() {
        let r = timings(&[], &[], 1.0);
        assert!(r.passes.is_empty());
        assert_eq!(r.total, None);
    }
}
