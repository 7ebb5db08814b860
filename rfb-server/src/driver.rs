//! Display driver contract and event fan-out.
//!
//! A [`DisplayDriver`] is the session's window onto the actual screen: it
//! owns the pixels, the colour map and the hardware cursor, and it pushes
//! typed [`DisplayEvent`]s (damage, pointer activity, geometry changes) to
//! whoever subscribed. Sessions never mutate the framebuffer; they only
//! read it through `grab_area` at encode time. Input travels the other
//! way: decoded key/pointer/clipboard messages are handed to the driver's
//! sink methods.
//!
//! Event delivery is synchronous and ordered per listener. One
//! subscription covers every event kind and is torn down atomically by
//! `unsubscribe`; a session that is going away must unsubscribe on every
//! exit path or the driver will keep feeding a dead queue.

use parking_lot::Mutex;
use rfb_common::{Point, Rect};
use rfb_pixelbuffer::{ColorMapEntry, PixelFormat};
use std::sync::Arc;

/// A cursor glyph with its hotspot.
///
/// Pixels are RGBA8888 rows, `width * height * 4` bytes; alpha below 128
/// counts as transparent when the glyph is composited or masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerShape {
    pub hotspot: Point,
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
}

impl PointerShape {
    /// The screen rectangle the glyph covers when the hotspot sits at `pos`.
    pub fn bounds_at(&self, pos: Point) -> Rect {
        Rect::new(
            pos.x - self.hotspot.x,
            pos.y - self.hotspot.y,
            self.width as u32,
            self.height as u32,
        )
    }
}

/// Typed events a driver fans out to its subscribers.
#[derive(Debug, Clone)]
pub enum DisplayEvent {
    /// A screen region changed.
    Damage {
        /// Where the damage came from, for logging only.
        source: &'static str,
        rect: Rect,
        /// Important damage is delivered even before the client's first
        /// update request.
        important: bool,
        /// Encoding hint from the damage source, if any.
        preferred_encoding: Option<i32>,
    },
    /// The pointer moved to a new position.
    PointerMove(Point),
    /// The cursor glyph changed.
    PointerShapeChange(PointerShape),
    /// The desktop itself changed size.
    ScreenBounds(Rect),
    /// A window moved; both rectangles need repainting.
    WindowMoved { old: Rect, new: Rect },
    /// A window was resized in place.
    WindowResized { old: Rect, new: Rect },
    /// Generic "repaint everything" signal.
    Update,
    /// Ring the client's bell.
    Bell,
    /// Server-side clipboard changed.
    CutText(String),
}

/// Receives driver events. Implementations must be cheap and non-blocking;
/// delivery happens on the driver's notification path.
pub trait DisplayEventListener: Send + Sync {
    fn display_event(&self, event: &DisplayEvent);
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// The screen a server session publishes.
pub trait DisplayDriver: Send + Sync {
    fn width(&self) -> u16;
    fn height(&self) -> u16;

    /// The format `grab_area` pixels come back in.
    fn pixel_format(&self) -> PixelFormat;

    /// Read a screen region as tightly packed rows in the driver's format.
    /// `rect` must lie within the desktop bounds.
    fn grab_area(&self, rect: Rect) -> Vec<u8>;

    /// The colour lookup table, empty for true-colour drivers.
    fn color_map(&self) -> Vec<ColorMapEntry>;

    fn pointer_shape(&self) -> PointerShape;
    fn pointer_position(&self) -> Point;

    /// Register a listener for all event kinds.
    fn subscribe(&self, listener: Arc<dyn DisplayEventListener>) -> SubscriptionId;

    /// Atomically tear down one subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    // Input sinks fed by decoded client messages.
    fn key_event(&self, keysym: u32, down: bool);
    fn pointer_event(&self, buttons: u8, x: u16, y: u16);
    fn cut_text(&self, text: &str);

    /// Opaque file-transfer delegate; the session hands the whole message
    /// body over without interpreting it.
    fn file_transfer(&self, _content_type: u8, _body: &[u8]) {}
}

/// Listener registry drivers can embed to get the fan-out contract right:
/// synchronous ordered delivery, atomic unsubscribe.
#[derive(Default)]
pub struct EventHub {
    inner: Mutex<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: Vec<(u64, Arc<dyn DisplayEventListener>)>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn DisplayEventListener>) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, listener));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id.0);
    }

    /// Deliver `event` to every listener in subscription order.
    pub fn publish(&self, event: &DisplayEvent) {
        // Snapshot so a listener can unsubscribe from inside its callback.
        let listeners: Vec<_> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.display_event(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory driver for exercising the session and encoder.

    use super::*;
    use rfb_pixelbuffer::{ManagedPixelBuffer, MutablePixelBuffer, PixelBuffer};

    pub struct TestDriver {
        framebuffer: Mutex<ManagedPixelBuffer>,
        format: PixelFormat,
        width: u16,
        height: u16,
        shape: Mutex<PointerShape>,
        position: Mutex<Point>,
        pub hub: EventHub,
        pub keys: Mutex<Vec<(u32, bool)>>,
        pub pointer_events: Mutex<Vec<(u8, u16, u16)>>,
        pub cuts: Mutex<Vec<String>>,
    }

    impl TestDriver {
        pub fn new(width: u16, height: u16) -> Self {
            Self::with_format(width, height, PixelFormat::rgb888())
        }

        pub fn with_format(width: u16, height: u16, format: PixelFormat) -> Self {
            Self {
                framebuffer: Mutex::new(ManagedPixelBuffer::new(
                    width as u32,
                    height as u32,
                    format.clone(),
                )),
                format,
                width,
                height,
                shape: Mutex::new(PointerShape {
                    hotspot: Point::new(0, 0),
                    width: 4,
                    height: 4,
                    pixels: vec![0xFF; 4 * 4 * 4],
                }),
                position: Mutex::new(Point::new(0, 0)),
                hub: EventHub::new(),
                keys: Mutex::new(Vec::new()),
                pointer_events: Mutex::new(Vec::new()),
                cuts: Mutex::new(Vec::new()),
            }
        }

        pub fn fill(&self, rect: Rect, pixel: &[u8]) {
            self.framebuffer.lock().fill_rect(rect, pixel).expect("fill");
        }

        pub fn set_pointer(&self, pos: Point) {
            *self.position.lock() = pos;
        }
    }

    impl DisplayDriver for TestDriver {
        fn width(&self) -> u16 {
            self.width
        }

        fn height(&self) -> u16 {
            self.height
        }

        fn pixel_format(&self) -> PixelFormat {
            self.format.clone()
        }

        fn grab_area(&self, rect: Rect) -> Vec<u8> {
            let fb = self.framebuffer.lock();
            let bpp = self.format.bytes_per_pixel() as usize;
            let mut stride = 0;
            let data = fb.get_buffer(rect, &mut stride).expect("grab in bounds");
            let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize * bpp);
            for row in 0..rect.height as usize {
                let start = row * stride * bpp;
                out.extend_from_slice(&data[start..start + rect.width as usize * bpp]);
            }
            out
        }

        fn color_map(&self) -> Vec<ColorMapEntry> {
            self.format.color_map().to_vec()
        }

        fn pointer_shape(&self) -> PointerShape {
            self.shape.lock().clone()
        }

        fn pointer_position(&self) -> Point {
            *self.position.lock()
        }

        fn subscribe(&self, listener: Arc<dyn DisplayEventListener>) -> SubscriptionId {
            self.hub.subscribe(listener)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.hub.unsubscribe(id);
        }

        fn key_event(&self, keysym: u32, down: bool) {
            self.keys.lock().push((keysym, down));
        }

        fn pointer_event(&self, buttons: u8, x: u16, y: u16) {
            self.pointer_events.lock().push((buttons, x, y));
        }

        fn cut_text(&self, text: &str) {
            self.cuts.lock().push(text.to_string());
        }
    }
}
