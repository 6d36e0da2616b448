//! Symbolization of captured stack traces.
//!
//! The expected split is that addresses of a stack trace are captured
//! into a [`FrameArray`] right at the point of a crash, while the
//! symbolization of those addresses via [`Symbolizer`] and any
//! printing happen afterwards. All state derived from object files is
//! built when images are registered; the lookups themselves do not
//! allocate.

mod symbolizer;

pub use symbolizer::Symbolizer;

use crate::Addr;


/// The maximum number of object images a [`Symbolizer`] keeps track
/// of.
pub const MAX_IMAGES: usize = 1024;


/// A source location, as retrieved from debug information.
///
/// The referenced strings live inside the [`Symbolizer`] that produced
/// the location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Location<'sym> {
    /// The directory of the source file, possibly empty.
    pub dir: &'sym str,
    /// The name of the source file, possibly empty.
    pub file: &'sym str,
    /// The one based line number, or zero if unknown.
    pub line: u32,
}


/// The symbolization result for a single stack frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolizedFrame<'sym> {
    /// Whether anything at all could be resolved for the frame's
    /// address.
    pub found: bool,
    /// Whether the frame represents a signal trampoline.
    ///
    /// Symbolization passes this flag through untouched; it is up to
    /// the stack capturing logic to set it.
    pub is_signal_frame: bool,
    /// The name of the function containing the address.
    pub name: Option<&'sym str>,
    /// The source location of the address.
    pub location: Option<Location<'sym>>,
}


/// A fixed capacity array of captured stack frames.
///
/// The array is plain data with no heap backing, making it suitable
/// for static allocation and for being filled in from a signal
/// handler.
#[derive(Clone, Copy, Debug)]
pub struct FrameArray<'sym, const N: usize> {
    /// The number of frames reported by the capture, which can exceed
    /// `N` if the stack was deeper than the array.
    pub frame_count: usize,
    /// The captured return addresses.
    pub addrs: [Addr; N],
    /// The symbolization results, pairwise with `addrs`.
    pub frames: [SymbolizedFrame<'sym>; N],
}

impl<'sym, const N: usize> FrameArray<'sym, N> {
    /// Create an empty array.
    pub const fn new() -> Self {
        Self {
            frame_count: 0,
            addrs: [0; N],
            frames: [SymbolizedFrame {
                found: false,
                is_signal_frame: false,
                name: None,
                location: None,
            }; N],
        }
    }

    /// Record the outcome of a stack capture that filled `addrs`.
    ///
    /// A negative `reported` count marks the capture as failed and
    /// empties the array. Otherwise the count is stored as-is, with
    /// any stale symbolization state of the stored frames cleared.
    ///
    /// Returns whether the capture succeeded.
    pub fn record_capture(&mut self, reported: isize) -> bool {
        let reported = match usize::try_from(reported) {
            Ok(reported) => reported,
            Err(..) => {
                self.frame_count = 0;
                return false
            }
        };
        self.frame_count = reported;
        let populated = self.populated();
        for frame in self.frames.iter_mut().take(populated) {
            *frame = SymbolizedFrame::default();
        }
        true
    }

    /// The number of frames actually stored.
    #[inline]
    pub fn populated(&self) -> usize {
        self.frame_count.min(N)
    }
}

impl<const N: usize> Default for FrameArray<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
