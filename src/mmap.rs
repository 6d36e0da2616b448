use std::fs::File;
use std::ops::Deref;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A type encapsulating a read-only memory mapped file.
#[derive(Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping. `None` for empty files.
    mapping: Option<Mapping>,
}

impl Mmap {
    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = libc::size_t::try_from(file.metadata()?.len())
            .map_err(Error::with_invalid_data)
            .context("file is too large to mmap")?;

        // The kernel does not allow mmap'ing a region of size 0. We
        // want to enable this case transparently, though.
        let mapping = if len == 0 {
            None
        } else {
            let opts = MmapOptions::new();
            let mapping = unsafe { opts.map(file) }?;
            Some(mapping)
        };
        Ok(Self { mapping })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.mapping {
            Some(mapping) => mapping.deref(),
            None => &[],
        }
    }
}
