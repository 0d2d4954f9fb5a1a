use crate::transport::OutputSink;
use crate::types::FrameRecord;
use crate::{ProbeError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::time::Duration;

/// Create a bounded frame channel.
///
/// The sink half goes to [`ProbeDevice`](crate::ProbeDevice), the stream half
/// to whoever consumes frames.
pub fn frame_channel(capacity: usize) -> (ChannelSink, FrameStream) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (
        ChannelSink {
            sender,
            delivered: 0,
        },
        FrameStream { receiver },
    )
}

/// Sending half of [`frame_channel`].
pub struct ChannelSink {
    sender: Sender<FrameRecord>,
    /// Frames delivered since the last `clear`.
    delivered: usize,
}

impl OutputSink for ChannelSink {
    fn accept(&mut self, frame: FrameRecord) -> Result<()> {
        match self.sender.try_send(frame) {
            Ok(()) => {
                self.delivered += 1;
                Ok(())
            }
            Err(TrySendError::Full(frame)) => {
                log::trace!("Frame channel full, dropping frame {}", frame.index);
                Err(ProbeError::SinkFull(frame.index))
            }
            Err(TrySendError::Disconnected(_)) => Err(ProbeError::StreamStopped),
        }
    }

    fn item_count(&self) -> usize {
        self.delivered
    }

    fn clear(&mut self) {
        self.delivered = 0;
    }
}

/// Receiving half of [`frame_channel`].
pub struct FrameStream {
    receiver: Receiver<FrameRecord>,
}

impl FrameStream {
    /// Receive the next frame (blocks until available).
    pub fn recv(&self) -> Result<FrameRecord> {
        self.receiver.recv().map_err(|_| ProbeError::StreamStopped)
    }

    /// Try to receive a frame without blocking.
    pub fn try_recv(&self) -> Option<FrameRecord> {
        self.receiver.try_recv().ok()
    }

    /// Receive a frame with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FrameRecord> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => ProbeError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => ProbeError::StreamStopped,
        })
    }

    /// Frames waiting in the channel.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameSize;

    fn frame(index: u64) -> FrameRecord {
        FrameRecord {
            pixels: vec![0; 4],
            index,
            timestamp_s: 0.0,
            size: FrameSize::new(2, 2),
            pixel_spacing_mm: [1.0; 3],
        }
    }

    #[test]
    fn test_full_channel_drops_frame() {
        let (mut sink, stream) = frame_channel(1);
        sink.accept(frame(1)).unwrap();
        assert!(matches!(sink.accept(frame(2)), Err(ProbeError::SinkFull(2))));
        assert_eq!(sink.item_count(), 1);
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.recv().unwrap().index, 1);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_clear_resets_count() {
        let (mut sink, _stream) = frame_channel(4);
        sink.accept(frame(1)).unwrap();
        sink.clear();
        assert_eq!(sink.item_count(), 0);
    }

    #[test]
    fn test_dropped_stream() {
        let (mut sink, stream) = frame_channel(4);
        drop(stream);
        assert!(matches!(sink.accept(frame(1)), Err(ProbeError::StreamStopped)));
    }

    #[test]
    fn test_recv_timeout() {
        let (sink, stream) = frame_channel(4);
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(5)),
            Err(ProbeError::Timeout)
        ));
        drop(sink);
        assert!(matches!(stream.recv(), Err(ProbeError::StreamStopped)));
    }
}
