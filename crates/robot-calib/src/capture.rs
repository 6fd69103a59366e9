//! Frame polling and settle waits shared by the calibration phases.

use crate::interfaces::FrameSource;
use std::time::{Duration, Instant};

/// Poll `source` until it yields a frame.
///
/// `None` is "not yet", never an error; a zero `poll` yields the thread
/// between attempts instead of sleeping.
pub fn wait_for_frame<S: FrameSource + ?Sized>(source: &mut S, poll: Duration) -> S::Frame {
    loop {
        if let Some(frame) = source.latest_frame() {
            return frame;
        }
        settle(poll);
    }
}

/// Like [`wait_for_frame`], but gives up once `timeout` has elapsed.
pub fn wait_for_frame_within<S: FrameSource + ?Sized>(
    source: &mut S,
    poll: Duration,
    timeout: Duration,
) -> Option<S::Frame> {
    let start = Instant::now();
    loop {
        if let Some(frame) = source.latest_frame() {
            return Some(frame);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        settle(poll);
    }
}

/// Discard up to `count` frames so the next one is captured after the last move.
pub fn flush<S: FrameSource + ?Sized>(source: &mut S, count: usize) {
    for _ in 0..count {
        let _ = source.latest_frame();
    }
}

pub fn settle(d: Duration) {
    if d.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(d);
    }
}
