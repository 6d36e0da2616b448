//! Printing of symbolized stack traces.
//!
//! Printers come in graded signal safety: every printer implements
//! [`FramePrinter`], but only those that are usable from a signal
//! handler additionally implement the [`HandlerSafe`] marker. Code
//! that runs in a fault handler can require `HandlerSafe` and have the
//! compiler reject unsuitable sinks.

use std::fmt;
use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::io::BufWriter;
use std::io::Write as _;
use std::ops::BitOr;
use std::ops::BitOrAssign;
use std::os::unix::io::RawFd;
use std::str;

#[cfg(feature = "demangle")]
use crate::demangle::maybe_demangle;
use crate::symbolize::FrameArray;
use crate::symbolize::SymbolizedFrame;
use crate::Addr;


/// Flags adjusting the output format of a printer, composable with
/// `|`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrintFlags(u32);

impl PrintFlags {
    /// The default format.
    pub const NONE: PrintFlags = PrintFlags(0);
    /// Suppress the `(file:line)` suffix.
    pub const NO_FILE_AND_LINE: PrintFlags = PrintFlags(1 << 0);
    /// Print only the symbol name, or the raw address if unknown.
    pub const TERSE: PrintFlags = PrintFlags(1 << 1);

    /// Check whether all bits of `other` are set in `self`.
    #[inline]
    pub fn contains(self, other: PrintFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PrintFlags {
    type Output = PrintFlags;

    fn bitor(self, rhs: PrintFlags) -> PrintFlags {
        PrintFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PrintFlags {
    fn bitor_assign(&mut self, rhs: PrintFlags) {
        self.0 |= rhs.0;
    }
}


const LINE_BUF_SIZE: usize = 512;

/// A fixed capacity, stack allocated line buffer.
///
/// Writes past the capacity truncate on a character boundary, so the
/// contents always remain valid UTF-8.
struct LineBuf {
    buf: [u8; LINE_BUF_SIZE],
    len: usize,
}

impl LineBuf {
    const fn new() -> Self {
        Self {
            buf: [0; LINE_BUF_SIZE],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // SAFETY: Only complete UTF-8 sequences are ever appended.
        unsafe { str::from_utf8_unchecked(&self.buf[..self.len]) }
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = LINE_BUF_SIZE - self.len;
        let mut end = s.len().min(avail);
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[self.len..self.len + end].copy_from_slice(&s.as_bytes()[..end]);
        self.len += end;
        Ok(())
    }
}


fn write_name(buf: &mut LineBuf, name: &str, demangle: bool) {
    #[cfg(feature = "demangle")]
    if demangle {
        let _ = buf.write_str(&maybe_demangle(name));
        return
    }
    #[cfg(not(feature = "demangle"))]
    let _demangle = demangle;
    let _ = buf.write_str(name);
}

/// Format a single frame into `buf`, without a trailing newline.
fn format_frame(
    buf: &mut LineBuf,
    idx: Option<usize>,
    addr: Addr,
    frame: &SymbolizedFrame<'_>,
    flags: PrintFlags,
    demangle: bool,
) {
    if flags.contains(PrintFlags::TERSE) {
        match frame.name {
            Some(name) if !name.is_empty() => write_name(buf, name, demangle),
            _ => {
                let _ = write!(buf, "{addr:#x}");
            }
        }
        return
    }

    if let Some(idx) = idx {
        let _ = write!(buf, "#{idx} ");
    }
    let _ = write!(buf, "{addr:#018x} ");
    match frame.name {
        Some(name) => write_name(buf, name, demangle),
        None => {
            let _ = buf.write_str("(unknown)");
        }
    }
    if !flags.contains(PrintFlags::NO_FILE_AND_LINE) {
        if let Some(location) = frame.location {
            if !location.file.is_empty() {
                if location.dir.is_empty() {
                    let _ = write!(buf, " ({}:{})", location.file, location.line);
                } else {
                    let _ = write!(buf, " ({}/{}:{})", location.dir, location.file, location.line);
                }
            }
        }
    }
}


/// A sink for symbolized stack frames.
pub trait FramePrinter {
    /// Whether this printer may be used from a signal handler.
    ///
    /// Signal safe printers neither allocate nor acquire locks while
    /// printing, which also means they do not demangle.
    const SIGNAL_SAFE: bool = false;

    /// Write a chunk of output to the underlying sink.
    ///
    /// There is no way to reasonably handle a failure to emit a stack
    /// trace; implementations drop sink errors.
    fn write_out(&mut self, s: &str);

    /// The format flags in effect.
    fn flags(&self) -> PrintFlags;

    /// Print a single frame, without a trailing newline.
    fn print(&mut self, addr: Addr, frame: &SymbolizedFrame<'_>) {
        let mut buf = LineBuf::new();
        let () = format_frame(&mut buf, None, addr, frame, self.flags(), !Self::SIGNAL_SAFE);
        self.write_out(buf.as_str())
    }

    /// Print a single frame, followed by a newline.
    fn println(&mut self, addr: Addr, frame: &SymbolizedFrame<'_>) {
        let () = self.print(addr, frame);
        self.write_out("\n")
    }

    /// Print the frames of a trace pairwise with their addresses, one
    /// line each, prefixed with the frame's index in the output.
    ///
    /// The first `skip` frames are omitted; a `skip` at or past the
    /// end prints nothing.
    fn println_frames(&mut self, addrs: &[Addr], frames: &[SymbolizedFrame<'_>], skip: usize) {
        let count = addrs.len().min(frames.len());
        if skip >= count {
            return
        }
        for (idx, (addr, frame)) in addrs[skip..count]
            .iter()
            .zip(&frames[skip..count])
            .enumerate()
        {
            let mut buf = LineBuf::new();
            let () = format_frame(
                &mut buf,
                Some(idx),
                *addr,
                frame,
                self.flags(),
                !Self::SIGNAL_SAFE,
            );
            let () = self.write_out(buf.as_str());
            self.write_out("\n")
        }
    }

    /// Print the populated frames of a frame array.
    fn println_frame_array<const N: usize>(&mut self, frames: &FrameArray<'_, N>, skip: usize) {
        let populated = frames.populated();
        self.println_frames(&frames.addrs[..populated], &frames.frames[..populated], skip)
    }
}


/// Marker for printers that are safe to use from a signal handler.
pub trait HandlerSafe: FramePrinter {}


/// A printer writing to an [`io::Write`] stream.
#[derive(Debug)]
pub struct StreamPrinter<W> {
    writer: W,
    flags: PrintFlags,
}

impl<W> StreamPrinter<W>
where
    W: io::Write,
{
    /// Create a printer writing to `writer`.
    pub fn new(writer: W, flags: PrintFlags) -> Self {
        Self { writer, flags }
    }
}

impl<W> FramePrinter for StreamPrinter<W>
where
    W: io::Write,
{
    fn write_out(&mut self, s: &str) {
        let _result = self.writer.write_all(s.as_bytes());
    }

    fn flags(&self) -> PrintFlags {
        self.flags
    }
}


/// A printer writing directly to a raw file descriptor.
///
/// The only printer that is safe to use from a signal handler: output
/// is formatted into a fixed stack buffer and emitted with plain
/// `write` calls.
#[derive(Debug)]
pub struct FdPrinter {
    fd: RawFd,
    flags: PrintFlags,
}

impl FdPrinter {
    /// Create a printer writing to the provided file descriptor, which
    /// remains owned by the caller.
    pub fn new(fd: RawFd, flags: PrintFlags) -> Self {
        Self { fd, flags }
    }
}

impl FramePrinter for FdPrinter {
    const SIGNAL_SAFE: bool = true;

    fn write_out(&mut self, s: &str) {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            // SAFETY: The pointer is valid for `len` bytes.
            let rc = unsafe { libc::write(self.fd, bytes.as_ptr().cast(), bytes.len()) };
            if rc < 0 {
                if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                    continue
                }
                break
            }
            if rc == 0 {
                break
            }
            bytes = &bytes[rc as usize..];
        }
    }

    fn flags(&self) -> PrintFlags {
        self.flags
    }
}

impl HandlerSafe for FdPrinter {}


/// A printer writing to a buffered file.
#[derive(Debug)]
pub struct FilePrinter {
    writer: BufWriter<File>,
    flags: PrintFlags,
}

impl FilePrinter {
    /// Create a printer writing to `file`.
    pub fn new(file: File, flags: PrintFlags) -> Self {
        Self {
            writer: BufWriter::new(file),
            flags,
        }
    }
}

impl FramePrinter for FilePrinter {
    fn write_out(&mut self, s: &str) {
        let _result = self.writer.write_all(s.as_bytes());
    }

    fn flags(&self) -> PrintFlags {
        self.flags
    }
}


/// A printer collecting output into an in-memory string.
#[derive(Debug, Default)]
pub struct BufferPrinter {
    buf: String,
    flags: PrintFlags,
}

impl BufferPrinter {
    /// Create an empty printer.
    pub fn new(flags: PrintFlags) -> Self {
        Self {
            buf: String::new(),
            flags,
        }
    }

    /// The output collected so far.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Consume the printer, yielding the collected output.
    #[inline]
    pub fn into_string(self) -> String {
        self.buf
    }
}

impl FramePrinter for BufferPrinter {
    fn write_out(&mut self, s: &str) {
        let () = self.buf.push_str(s);
    }

    fn flags(&self) -> PrintFlags {
        self.flags
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::read_to_string;
    use std::os::unix::io::AsRawFd as _;

    use tempfile::NamedTempFile;

    use test_log::test;

    use crate::symbolize::Location;


    fn test_frame() -> SymbolizedFrame<'static> {
        SymbolizedFrame {
            found: true,
            is_signal_frame: false,
            name: Some("fib"),
            location: Some(Location {
                dir: "src",
                file: "fib.rs",
                line: 10,
            }),
        }
    }

    /// Check the default line shape.
    #[test]
    fn full_format() {
        let mut printer = BufferPrinter::new(PrintFlags::NONE);
        let () = printer.println(0x1000, &test_frame());
        assert_eq!(printer.as_str(), "0x0000000000001000 fib (src/fib.rs:10)\n");
    }

    /// A frame without a symbol name prints a placeholder.
    #[test]
    fn unknown_name() {
        let mut frame = test_frame();
        frame.name = None;
        frame.location = None;

        let mut printer = BufferPrinter::new(PrintFlags::NONE);
        let () = printer.println(0x1000, &frame);
        assert_eq!(printer.as_str(), "0x0000000000001000 (unknown)\n");
    }

    /// An empty directory does not produce a leading slash.
    #[test]
    fn location_without_directory() {
        let mut frame = test_frame();
        frame.location = Some(Location {
            dir: "",
            file: "fib.rs",
            line: 10,
        });

        let mut printer = BufferPrinter::new(PrintFlags::NONE);
        let () = printer.print(0x1000, &frame);
        assert_eq!(printer.as_str(), "0x0000000000001000 fib (fib.rs:10)");
    }

    /// `NO_FILE_AND_LINE` suppresses the location suffix.
    #[test]
    fn suppressed_location() {
        let mut printer = BufferPrinter::new(PrintFlags::NO_FILE_AND_LINE);
        let () = printer.println(0x1000, &test_frame());
        assert_eq!(printer.as_str(), "0x0000000000001000 fib\n");
    }

    /// Terse mode prints the name if there is one and the bare address
    /// otherwise.
    #[test]
    fn terse_format() {
        let mut printer = BufferPrinter::new(PrintFlags::TERSE);
        let () = printer.println(0x1000, &test_frame());
        assert_eq!(printer.as_str(), "fib\n");

        let mut printer = BufferPrinter::new(PrintFlags::TERSE);
        let () = printer.println(0x1234, &SymbolizedFrame::default());
        assert_eq!(printer.as_str(), "0x1234\n");
    }

    /// Flags compose with `|`.
    #[test]
    fn flag_composition() {
        let flags = PrintFlags::TERSE | PrintFlags::NO_FILE_AND_LINE;
        assert!(flags.contains(PrintFlags::TERSE));
        assert!(flags.contains(PrintFlags::NO_FILE_AND_LINE));
        assert!(!PrintFlags::TERSE.contains(PrintFlags::NO_FILE_AND_LINE));

        let mut flags = PrintFlags::NONE;
        flags |= PrintFlags::TERSE;
        assert!(flags.contains(PrintFlags::TERSE));
    }

    /// Batch output prefixes frame indices and honors `skip`.
    #[test]
    fn batch_format() {
        let addrs = [0x1000, 0x2000];
        let frames = [test_frame(), SymbolizedFrame::default()];

        let mut printer = BufferPrinter::new(PrintFlags::NO_FILE_AND_LINE);
        let () = printer.println_frames(&addrs, &frames, 0);
        assert_eq!(
            printer.as_str(),
            "#0 0x0000000000001000 fib\n#1 0x0000000000002000 (unknown)\n"
        );

        let mut printer = BufferPrinter::new(PrintFlags::NO_FILE_AND_LINE);
        let () = printer.println_frames(&addrs, &frames, 1);
        assert_eq!(printer.as_str(), "#0 0x0000000000002000 (unknown)\n");
    }

    /// A skip at or past the end prints nothing.
    #[test]
    fn batch_skip_all() {
        let addrs = [0x1000, 0x2000];
        let frames = [test_frame(), test_frame()];

        let mut printer = BufferPrinter::new(PrintFlags::NONE);
        let () = printer.println_frames(&addrs, &frames, 2);
        assert_eq!(printer.as_str(), "");

        let () = printer.println_frames(&addrs, &frames, 100);
        assert_eq!(printer.as_str(), "");
    }

    /// Print the populated prefix of a frame array.
    #[test]
    fn frame_array_output() {
        let mut frames = FrameArray::<'_, 4>::new();
        frames.addrs[0] = 0x1000;
        frames.addrs[1] = 0x2000;
        assert!(frames.record_capture(2));
        frames.frames[0] = test_frame();

        let mut printer = BufferPrinter::new(PrintFlags::TERSE);
        let () = printer.println_frame_array(&frames, 0);
        assert_eq!(printer.as_str(), "fib\n0x2000\n");
    }

    /// Overlong names are truncated instead of overflowing the line
    /// buffer.
    #[test]
    fn overlong_line_truncation() {
        let name = "x".repeat(2 * LINE_BUF_SIZE);
        let mut frame = test_frame();
        frame.name = Some(&name);

        let mut printer = BufferPrinter::new(PrintFlags::NONE);
        let () = printer.print(0x1000, &frame);
        assert_eq!(printer.as_str().len(), LINE_BUF_SIZE);
    }

    /// Descriptor based printing ends up in the backing file.
    #[test]
    fn fd_output() {
        let file = NamedTempFile::new().unwrap();
        let mut printer = FdPrinter::new(file.as_file().as_raw_fd(), PrintFlags::TERSE);
        let () = printer.println(0x1000, &test_frame());

        let content = read_to_string(file.path()).unwrap();
        assert_eq!(content, "fib\n");
    }

    /// `FdPrinter` satisfies the handler safety marker.
    #[test]
    fn fd_printer_is_handler_safe() {
        fn print_from_handler<P>(printer: &mut P, addr: Addr, frame: &SymbolizedFrame<'_>)
        where
            P: HandlerSafe,
        {
            printer.println(addr, frame)
        }

        let file = NamedTempFile::new().unwrap();
        let mut printer = FdPrinter::new(file.as_file().as_raw_fd(), PrintFlags::TERSE);
        let () = print_from_handler(&mut printer, 0x2000, &SymbolizedFrame::default());

        let content = read_to_string(file.path()).unwrap();
        assert_eq!(content, "0x2000\n");
    }

    /// Mangled names are demangled by allocation friendly printers.
    #[cfg(feature = "demangle")]
    #[test]
    fn demangled_output() {
        let mut frame = test_frame();
        frame.name = Some("_ZN7example4main17h0db00cc9b2f7b8a6E");
        frame.location = None;

        let mut printer = BufferPrinter::new(PrintFlags::TERSE);
        let () = printer.println(0x1000, &frame);
        assert_eq!(printer.as_str(), "example::main\n");
    }

    /// Buffered file printing lands on disk once the printer is
    /// dropped.
    #[test]
    fn file_output() {
        let file = NamedTempFile::new().unwrap();
        let mut printer = FilePrinter::new(file.reopen().unwrap(), PrintFlags::TERSE);
        let () = printer.println(0x1000, &test_frame());
        drop(printer);

        let content = read_to_string(file.path()).unwrap();
        assert_eq!(content, "fib\n");
    }

    /// Stream based printing works against arbitrary writers.
    #[test]
    fn stream_output() {
        let mut out = Vec::new();
        let mut printer = StreamPrinter::new(&mut out, PrintFlags::TERSE);
        let () = printer.println(0x1000, &test_frame());
        drop(printer);
        assert_eq!(out, b"fib\n");
    }
}
