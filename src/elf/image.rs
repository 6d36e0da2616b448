use std::fmt;
use std::mem;
use std::path::Path;
use std::path::PathBuf;

use crate::dwarf::LineResolver;
use crate::log;
use crate::symbolize::Location;
use crate::Addr;
use crate::Error;
use crate::Result;

use super::parser::ElfParser;
use super::types::ET_EXEC;
use super::types::PT_LOAD;


/// A loaded executable or shared object, together with the address
/// range it occupies in the process.
///
/// All parsing work happens when the image is created. Lookups against
/// a loaded image do not allocate and do not touch the file system,
/// which makes them usable from contexts such as signal handlers.
pub struct ObjectImage {
    /// The path from which the image was loaded.
    path: PathBuf,
    /// Offset to add to file relative addresses to arrive at addresses
    /// as seen by the process.
    bias: Addr,
    /// The virtual address range covered by the image's loadable
    /// segments, with the bias applied.
    range: (Addr, Addr),
    /// Parsed line number information.
    ///
    /// Declared before `parser` so that it is dropped first: it
    /// borrows the parser's underlying file mapping.
    lines: Option<LineResolver<'static>>,
    parser: Option<ElfParser>,
}

impl ObjectImage {
    /// Load the ELF object at `path`, mapped by the process at
    /// `load_base`.
    ///
    /// Loading never fails. If the file is missing or malformed the
    /// resulting image covers no addresses and resolves nothing, so
    /// that a single bad object does not take down crash reporting for
    /// the remaining ones.
    pub fn load(path: &Path, load_base: Addr) -> Self {
        match Self::try_load(path, load_base) {
            Ok(slf) => slf,
            Err(err) => {
                log::debug!("failed to load object {}: {err}", path.display());
                Self {
                    path: path.to_path_buf(),
                    bias: 0,
                    range: (0, 0),
                    lines: None,
                    parser: None,
                }
            }
        }
    }

    fn try_load(path: &Path, load_base: Addr) -> Result<Self> {
        let parser = ElfParser::open(path)?;
        let file_type = parser.file_type()?;
        let phdrs = parser.program_headers()?;

        let mut low = Addr::MAX;
        let mut high = 0;
        for phdr in phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
            low = low.min(phdr.p_vaddr);
            high = high.max(phdr.p_vaddr.saturating_add(phdr.p_memsz));
        }
        if low >= high {
            return Err(Error::with_invalid_data("no loadable segments found"))
        }

        // Fixed position executables report their run time addresses
        // directly; everything else is subject to relocation by the
        // loader.
        let bias = if file_type == ET_EXEC { 0 } else { load_base };
        let range = (bias.wrapping_add(low), bias.wrapping_add(high));

        let lines = match LineResolver::parse(&parser) {
            Ok(lines) => lines,
            Err(err) => {
                log::debug!(
                    "failed to parse line information of {}: {err}",
                    path.display()
                );
                None
            }
        };
        // SAFETY: The line resolver borrows the parser's file mapping,
        //         which lives as long as the parser stored right next
        //         to it and is at a stable address. We never hand out
        //         references at the static lifetime.
        let lines = unsafe {
            mem::transmute::<Option<LineResolver<'_>>, Option<LineResolver<'static>>>(lines)
        };

        Ok(Self {
            path: path.to_path_buf(),
            bias,
            range,
            lines,
            parser: Some(parser),
        })
    }

    /// The path from which this image was loaded.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether `addr`, as seen by the process, falls into this
    /// image.
    #[inline]
    pub fn contains_addr(&self, addr: Addr) -> bool {
        self.range.0 <= addr && addr < self.range.1
    }

    /// Convert a process address into a file relative one.
    fn virt_offset(&self, addr: Addr) -> Addr {
        addr.wrapping_sub(self.bias)
    }

    /// Find the function symbol covering `addr`.
    ///
    /// Returns the symbol's name, its start address as seen by the
    /// process, and its size.
    pub fn lookup_symbol(&self, addr: Addr) -> Option<(&str, Addr, usize)> {
        let parser = self.parser.as_ref()?;
        match parser.find_sym(self.virt_offset(addr)) {
            Ok(Some((name, start, size))) => Some((name, start.wrapping_add(self.bias), size)),
            Ok(None) => None,
            Err(err) => {
                log::debug!(
                    "failed to look up symbol in {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Find the source location covering `addr`.
    pub fn lookup_line(&self, addr: Addr) -> Option<Location<'_>> {
        self.lines.as_ref()?.find_location(self.virt_offset(addr))
    }
}

impl fmt::Debug for ObjectImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectImage({:#x}-{:#x} {})",
            self.range.0,
            self.range.1,
            self.path.display()
        )
    }
}
