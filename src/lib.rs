//! **faultline** resolves the addresses of a captured stack trace to
//! function names, source files, and line numbers. It is built for
//! crash reporting: all file access and parsing happens when object
//! images are registered, so that the lookups themselves are usable
//! from contexts as constrained as a fatal signal handler.
//!
//! The pieces are:
//! - [`symbolize::Symbolizer`], which holds the registered
//!   [`ObjectImage`]s and resolves addresses against them without
//!   allocating,
//! - [`symbolize::FrameArray`], a fixed capacity, heap free container
//!   for captured addresses and their symbolization results,
//! - the [`print::FramePrinter`] hierarchy for emitting traces, with
//!   the [`print::HandlerSafe`] marker singling out the printers that
//!   may run inside a signal handler.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use faultline::print::FramePrinter as _;
//! use faultline::print::PrintFlags;
//! use faultline::print::StreamPrinter;
//! use faultline::symbolize::FrameArray;
//! use faultline::symbolize::Symbolizer;
//!
//! let mut symbolizer = Symbolizer::new();
//! symbolizer.register_image(Path::new("/proc/self/exe"), 0);
//!
//! let mut frames = FrameArray::<'_, 64>::new();
//! // Fill `frames.addrs` from a stack unwinder, then adapt its
//! // reported frame count:
//! let reported = 2;
//! frames.addrs[0] = 0x7f1234561000;
//! frames.addrs[1] = 0x7f1234562040;
//! assert!(frames.record_capture(reported));
//!
//! symbolizer.symbolize_frames(&mut frames);
//!
//! let mut printer = StreamPrinter::new(std::io::stderr(), PrintFlags::NONE);
//! printer.println_frame_array(&frames, 0);
//! ```

#[cfg(feature = "demangle")]
mod demangle;
mod dwarf;
mod elf;
mod error;
mod log;
mod mmap;
mod once;
pub mod print;
pub mod symbolize;
mod util;

pub use crate::elf::ObjectImage;
pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoCowStr;
pub use crate::error::IntoError;
pub use crate::error::Result;

/// A process virtual address.
pub type Addr = u64;
