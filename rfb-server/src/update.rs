//! Damage coalescing and the per-session reply queue.
//!
//! Each session owns one [`UpdateEncoder`]. Driver events and decoded
//! client requests are folded into its queue under a mutex; the session's
//! write loop drains the queue and turns each [`Reply`] into wire bytes.
//! Frame updates are coalesced by containment so a storm of overlapping
//! damage collapses to a handful of rectangles.

use crate::driver::PointerShape;
use parking_lot::Mutex;
use rfb_common::{Point, Rect};
use rfb_protocol::messages::server::ColorMapEntry;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

/// One unit of work for the session's write loop.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Encode and send this framebuffer region.
    Frame {
        rect: Rect,
        important: bool,
        preferred_encoding: Option<i32>,
    },
    /// Cursor moved; clients with the PointerPos pseudo-encoding get told.
    PointerPosition(Point),
    /// Cursor glyph changed; sent as a RichCursor pseudo-rectangle.
    PointerShape(PointerShape),
    /// The desktop was resized.
    DesktopSize { width: u16, height: u16 },
    Bell,
    CutText(String),
    ColorMap {
        first_color: u16,
        entries: Vec<ColorMapEntry>,
    },
}

struct EncoderState {
    queue: VecDeque<Reply>,
    /// Set once the client has sent its first update request; until then
    /// only important frames are queued.
    ready: bool,
    desktop: Rect,
}

/// Thread-safe reply queue with damage coalescing.
pub struct UpdateEncoder {
    state: Mutex<EncoderState>,
    notify: Notify,
}

impl UpdateEncoder {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            state: Mutex::new(EncoderState {
                queue: VecDeque::new(),
                ready: false,
                desktop: Rect::new(0, 0, width as u32, height as u32),
            }),
            notify: Notify::new(),
        }
    }

    pub fn set_ready(&self) {
        self.state.lock().ready = true;
    }

    pub fn desktop(&self) -> Rect {
        self.state.lock().desktop
    }

    /// Queue a frame update, clipped to the desktop and coalesced by
    /// containment against queued frames.
    pub fn frame_update(&self, rect: Rect, important: bool, preferred_encoding: Option<i32>) {
        let mut state = self.state.lock();
        let rect = rect.clip_to(&state.desktop);
        if rect.is_empty() {
            return;
        }
        if !state.ready && !important {
            return;
        }

        // Already covered by a queued frame, nothing to add.
        for queued in &state.queue {
            if let Reply::Frame { rect: existing, .. } = queued {
                if existing.contains(&rect) {
                    return;
                }
            }
        }
        // The new frame may supersede older, smaller ones.
        state.queue.retain(|queued| match queued {
            Reply::Frame { rect: existing, .. } => !rect.contains(existing),
            _ => true,
        });
        state.queue.push_back(Reply::Frame {
            rect,
            important,
            preferred_encoding,
        });
        drop(state);
        self.notify.notify_one();
    }

    pub fn pointer_position(&self, pos: Point) {
        self.push(Reply::PointerPosition(pos));
    }

    pub fn pointer_shape(&self, shape: PointerShape) {
        self.push(Reply::PointerShape(shape));
    }

    /// Record new desktop bounds and queue the DesktopSize notice ahead of
    /// any frames so the client resizes before painting.
    pub fn resize_window(&self, width: u16, height: u16) {
        let mut state = self.state.lock();
        state.desktop = Rect::new(0, 0, width as u32, height as u32);
        state.queue.push_front(Reply::DesktopSize { width, height });
        drop(state);
        self.notify.notify_one();
    }

    pub fn bell(&self) {
        self.push(Reply::Bell);
    }

    pub fn cut_text(&self, text: String) {
        self.push(Reply::CutText(text));
    }

    pub fn color_map(&self, first_color: u16, entries: Vec<ColorMapEntry>) {
        self.push(Reply::ColorMap {
            first_color,
            entries,
        });
    }

    /// A non-incremental request wants the whole screen fresh; pending
    /// partial frames are redundant.
    pub fn non_incremental_request(&self) {
        let mut state = self.state.lock();
        state.ready = true;
        state.queue.retain(|queued| !matches!(queued, Reply::Frame { .. }));
        let desktop = state.desktop;
        state.queue.push_back(Reply::Frame {
            rect: desktop,
            important: true,
            preferred_encoding: None,
        });
        drop(state);
        self.notify.notify_one();
    }

    /// Drain everything currently queued.
    pub fn pop_updates(&self) -> Vec<Reply> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Wait until the queue is non-empty or `timeout` elapses. Returns
    /// true when there is work.
    pub async fn wait_for_updates(&self, timeout: Duration) -> bool {
        // Arm the notification before checking emptiness so a push between
        // the check and the await is not lost.
        let notified = self.notify.notified();
        if !self.state.lock().queue.is_empty() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    fn push(&self, reply: Reply) {
        self.state.lock().queue.push_back(reply);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_rects(replies: &[Reply]) -> Vec<Rect> {
        replies
            .iter()
            .filter_map(|r| match r {
                Reply::Frame { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn contained_damage_is_dropped() {
        let encoder = UpdateEncoder::new(640, 480);
        encoder.set_ready();
        encoder.frame_update(Rect::new(0, 0, 100, 100), false, None);
        encoder.frame_update(Rect::new(10, 10, 20, 20), false, None);

        assert_eq!(frame_rects(&encoder.pop_updates()), vec![Rect::new(0, 0, 100, 100)]);
    }

    #[test]
    fn larger_damage_supersedes_queued_frames() {
        let encoder = UpdateEncoder::new(640, 480);
        encoder.set_ready();
        encoder.frame_update(Rect::new(10, 10, 20, 20), false, None);
        encoder.frame_update(Rect::new(30, 30, 5, 5), false, None);
        encoder.frame_update(Rect::new(0, 0, 100, 100), false, None);

        assert_eq!(frame_rects(&encoder.pop_updates()), vec![Rect::new(0, 0, 100, 100)]);
    }

    #[test]
    fn damage_is_clipped_to_desktop() {
        let encoder = UpdateEncoder::new(100, 100);
        encoder.set_ready();
        encoder.frame_update(Rect::new(90, 90, 50, 50), false, None);

        assert_eq!(frame_rects(&encoder.pop_updates()), vec![Rect::new(90, 90, 10, 10)]);
    }

    #[test]
    fn unimportant_damage_before_first_request_is_ignored() {
        let encoder = UpdateEncoder::new(100, 100);
        encoder.frame_update(Rect::new(0, 0, 10, 10), false, None);
        assert!(encoder.pop_updates().is_empty());

        encoder.frame_update(Rect::new(0, 0, 10, 10), true, None);
        assert_eq!(encoder.pop_updates().len(), 1);
    }

    #[test]
    fn non_incremental_collapses_to_full_desktop() {
        let encoder = UpdateEncoder::new(320, 200);
        encoder.set_ready();
        encoder.frame_update(Rect::new(0, 0, 10, 10), false, None);
        encoder.frame_update(Rect::new(50, 50, 10, 10), false, None);
        encoder.non_incremental_request();

        assert_eq!(
            frame_rects(&encoder.pop_updates()),
            vec![Rect::new(0, 0, 320, 200)]
        );
    }

    #[test]
    fn resize_queues_desktop_size_ahead_of_frames() {
        let encoder = UpdateEncoder::new(320, 200);
        encoder.set_ready();
        encoder.frame_update(Rect::new(0, 0, 10, 10), false, None);
        encoder.resize_window(640, 480);

        let replies = encoder.pop_updates();
        assert!(matches!(
            replies[0],
            Reply::DesktopSize {
                width: 640,
                height: 480
            }
        ));
        // Later damage clips to the new bounds.
        encoder.frame_update(Rect::new(0, 0, 641, 1), false, None);
        assert_eq!(frame_rects(&encoder.pop_updates()), vec![Rect::new(0, 0, 640, 1)]);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_queue_is_nonempty() {
        let encoder = UpdateEncoder::new(100, 100);
        encoder.bell();
        assert!(encoder.wait_for_updates(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn wait_times_out_on_empty_queue() {
        let encoder = UpdateEncoder::new(100, 100);
        assert!(!encoder.wait_for_updates(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn push_wakes_a_parked_waiter() {
        use std::sync::Arc;

        let encoder = Arc::new(UpdateEncoder::new(100, 100));
        let waiter = {
            let encoder = Arc::clone(&encoder);
            tokio::spawn(async move { encoder.wait_for_updates(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        encoder.bell();
        assert!(waiter.await.unwrap());
    }
}
