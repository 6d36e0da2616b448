use std::path::Path;

use crate::elf::ObjectImage;
use crate::log;
use crate::Addr;

use super::FrameArray;
use super::SymbolizedFrame;
use super::MAX_IMAGES;


/// A symbolizer, resolving process addresses to function names and
/// source locations.
///
/// Object images are registered up front, typically from the process'
/// own list of loaded objects. Registration parses the files and may
/// allocate; the `symbolize` family of methods afterwards does
/// neither.
#[derive(Debug)]
pub struct Symbolizer {
    images: Vec<ObjectImage>,
}

impl Symbolizer {
    /// Create a new symbolizer without any registered images.
    pub fn new() -> Self {
        // Full capacity up front, so that registrations never
        // reallocate.
        Self {
            images: Vec::with_capacity(MAX_IMAGES),
        }
    }

    /// Register the object at `path`, mapped by the process at
    /// `load_base`.
    ///
    /// A failure to load the object registers an image that resolves
    /// nothing. Registrations past [`MAX_IMAGES`] are silently
    /// ignored.
    pub fn register_image(&mut self, path: &Path, load_base: Addr) {
        if self.images.len() >= MAX_IMAGES {
            log::warn!(
                "ignoring registration of {}: image capacity reached",
                path.display()
            );
            return
        }
        let () = self.images.push(ObjectImage::load(path, load_base));
    }

    /// The number of registered images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Retrieve the registered images.
    #[inline]
    pub fn images(&self) -> &[ObjectImage] {
        &self.images
    }

    fn find_image(&self, addr: Addr) -> Option<&ObjectImage> {
        self.images.iter().find(|image| image.contains_addr(addr))
    }

    fn symbolize_into<'slf>(&'slf self, addr: Addr, frame: &mut SymbolizedFrame<'slf>) {
        frame.name = None;
        frame.location = None;
        if let Some(image) = self.find_image(addr) {
            frame.name = image.lookup_symbol(addr).map(|(name, _start, _size)| name);
            frame.location = image.lookup_line(addr);
        }
        frame.found = frame.name.is_some() || frame.location.is_some();
    }

    /// Symbolize a single address.
    pub fn symbolize_one(&self, addr: Addr) -> SymbolizedFrame<'_> {
        let mut frame = SymbolizedFrame::default();
        let () = self.symbolize_into(addr, &mut frame);
        frame
    }

    /// Symbolize `addrs` into `frames`, pairwise.
    ///
    /// Excess entries on either side are left untouched. The signal
    /// frame markers of `frames` are preserved. Does not allocate.
    pub fn symbolize<'slf>(&'slf self, addrs: &[Addr], frames: &mut [SymbolizedFrame<'slf>]) {
        for (addr, frame) in addrs.iter().zip(frames.iter_mut()) {
            let () = self.symbolize_into(*addr, frame);
        }
    }

    /// Symbolize the populated prefix of a frame array.
    pub fn symbolize_frames<'slf, const N: usize>(&'slf self, frames: &mut FrameArray<'slf, N>) {
        let populated = frames.populated();
        self.symbolize(&frames.addrs[..populated], &mut frames.frames[..populated])
    }
}

impl Default for Symbolizer {
    fn default() -> Self {
        Self::new()
    }
}
