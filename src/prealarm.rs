use crate::error::Result;
use crate::frame::Frame;
use crate::sink::FrameSink;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Fixed-capacity FIFO of recent raw frames, used to seed a new recording
/// with footage preceding the trigger instant.
///
/// Capacity is `round(preroll_seconds * fps)` and cannot be computed until
/// the source frame rate is known; until then `push` is a no-op. This is a
/// deliberate startup grace period: pre-alarm capture begins once the frame
/// rate has been established.
pub struct PreAlarmBuffer {
    frames: VecDeque<Frame>,
    preroll: Duration,
    capacity: Option<usize>,
}

impl PreAlarmBuffer {
    pub fn new(preroll: Duration) -> Self {
        Self {
            frames: VecDeque::new(),
            preroll,
            capacity: None,
        }
    }

    /// Fix the buffer capacity from the measured frame rate. Later calls
    /// are ignored; the capacity is established once per run.
    pub fn set_frame_rate(&mut self, fps: f64) {
        if self.capacity.is_some() || fps <= 0.0 {
            return;
        }
        let capacity = (self.preroll.as_secs_f64() * fps).round() as usize;
        debug!(
            "Pre-alarm buffer sized to {} frames ({:?} at {:.1} fps)",
            capacity, self.preroll, fps
        );
        self.capacity = Some(capacity);
    }

    /// Offer a frame to the buffer. Unconditional with respect to motion
    /// state; a no-op while the capacity is still unknown or zero.
    pub fn push(&mut self, frame: Frame) {
        let capacity = match self.capacity {
            Some(capacity) if capacity > 0 => capacity,
            _ => return,
        };

        if self.frames.len() == capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        trace!("Pre-alarm buffer holds {}/{} frames", self.frames.len(), capacity);
    }

    /// Write all buffered frames to the sink in arrival order, then empty
    /// the buffer.
    pub fn flush_into(&mut self, sink: &mut dyn FrameSink) -> Result<usize> {
        let count = self.frames.len();
        for frame in self.frames.drain(..) {
            sink.write_frame(&frame)?;
        }
        debug!("Flushed {} pre-alarm frames into new recording", count);
        Ok(count)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Computed capacity, once the frame rate is known
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::sink::FrameSink;
    use std::time::SystemTime;

    fn test_frame(id: u64) -> Frame {
        Frame::new(
            id,
            SystemTime::now(),
            vec![0u8; 16],
            4,
            4,
            PixelFormat::Gray8,
        )
    }

    #[derive(Default)]
    struct CollectingSink {
        ids: Vec<u64>,
    }

    impl FrameSink for CollectingSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.ids.push(frame.id);
            Ok(())
        }

        fn finalize(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_push_is_noop_before_frame_rate_known() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(5));
        for id in 0..20 {
            buffer.push(test_frame(id));
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), None);
    }

    #[test]
    fn test_capacity_from_frame_rate() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(5));
        buffer.set_frame_rate(10.0);
        assert_eq!(buffer.capacity(), Some(50));

        // Later measurements do not resize the buffer
        buffer.set_frame_rate(30.0);
        assert_eq!(buffer.capacity(), Some(50));
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(1));
        buffer.set_frame_rate(10.0);

        for id in 0..200 {
            buffer.push(test_frame(id));
            assert!(buffer.len() <= 10);
        }
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(1));
        buffer.set_frame_rate(3.0);

        for id in 0..5 {
            buffer.push(test_frame(id));
        }

        let mut sink = Box::new(CollectingSink::default());
        buffer.flush_into(sink.as_mut()).unwrap();
        assert_eq!(sink.ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_flush_preserves_order_and_empties() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(5));
        buffer.set_frame_rate(10.0);

        for id in 0..200 {
            buffer.push(test_frame(id));
        }

        let mut sink = Box::new(CollectingSink::default());
        let flushed = buffer.flush_into(sink.as_mut()).unwrap();

        // The last 50 frames seen, in arrival order
        assert_eq!(flushed, 50);
        assert_eq!(sink.ids, (150..200).collect::<Vec<u64>>());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_preroll_disables_buffering() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(0));
        buffer.set_frame_rate(10.0);
        assert_eq!(buffer.capacity(), Some(0));

        for id in 0..10 {
            buffer.push(test_frame(id));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut buffer = PreAlarmBuffer::new(Duration::from_secs(1));
        buffer.set_frame_rate(10.0);
        for id in 0..5 {
            buffer.push(test_frame(id));
        }
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
