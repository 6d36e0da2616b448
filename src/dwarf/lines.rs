//! Support for DWARF `.debug_line` line number programs (versions 2
//! to 4).
//!
//! Unit headers, include directories, and file tables are parsed up
//! front, as borrowed views into the underlying memory mapping. The
//! line number program itself is kept as its raw instruction stream
//! and executed anew for each query, stopping as soon as the address
//! in question is bracketed by two consecutive rows of a sequence. No
//! row matrix is ever materialized and queries do not allocate.

use crate::elf::ElfParser;
use crate::log;
use crate::symbolize::Location;
use crate::util::ReadRaw as _;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;

// Standard opcodes.
const DW_LNS_COPY: u8 = 1;
const DW_LNS_ADVANCE_PC: u8 = 2;
const DW_LNS_ADVANCE_LINE: u8 = 3;
const DW_LNS_SET_FILE: u8 = 4;
const DW_LNS_SET_COLUMN: u8 = 5;
const DW_LNS_NEGATE_STMT: u8 = 6;
const DW_LNS_SET_BASIC_BLOCK: u8 = 7;
const DW_LNS_CONST_ADD_PC: u8 = 8;
const DW_LNS_FIXED_ADVANCE_PC: u8 = 9;

// Extended opcodes.
const DW_LNE_END_SEQUENCE: u8 = 1;
const DW_LNE_SET_ADDRESS: u8 = 2;


/// The prologue values needed for executing a line number program.
#[derive(Clone, Copy, Debug)]
struct Prologue {
    minimum_instruction_length: u8,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
}


/// An entry of a unit's file table.
#[derive(Clone, Copy, Debug)]
struct FileEntry<'mmap> {
    /// The file name.
    name: &'mmap str,
    /// One based index into the unit's include directories; zero
    /// stands for the compilation directory.
    dir: u64,
}


/// The subset of the line number state machine's registers that we
/// track.
#[derive(Clone, Copy, Debug)]
struct Row {
    address: u64,
    file: u64,
    line: i64,
    end_sequence: bool,
}

impl Row {
    fn new() -> Self {
        Self {
            address: 0,
            file: 1,
            line: 1,
            end_sequence: false,
        }
    }
}


/// A single unit of the `.debug_line` section.
#[derive(Debug)]
struct LineUnit<'mmap> {
    prologue: Prologue,
    /// Operand counts of the standard opcodes, indexed by opcode - 1.
    std_opcode_lengths: &'mmap [u8],
    include_directories: Vec<&'mmap str>,
    files: Vec<FileEntry<'mmap>>,
    /// The raw line number program.
    program: &'mmap [u8],
}

impl<'mmap> LineUnit<'mmap> {
    /// Execute a single instruction of the line number program,
    /// advancing `data` past it.
    ///
    /// Returns whether the instruction emitted a row, or `None` on
    /// decode errors.
    fn step(&self, data: &mut &'mmap [u8], row: &mut Row) -> Option<bool> {
        let prologue = &self.prologue;
        let opcode = data.read_u8()?;

        if opcode >= prologue.opcode_base {
            // A special opcode; advances both address and line and
            // emits a row.
            let adjusted = opcode - prologue.opcode_base;
            let addr_adv = u64::from(adjusted / prologue.line_range)
                * u64::from(prologue.minimum_instruction_length);
            row.address = row.address.wrapping_add(addr_adv);
            row.line = row
                .line
                .wrapping_add(i64::from(prologue.line_base) + i64::from(adjusted % prologue.line_range));
            return Some(true)
        }

        match opcode {
            0 => {
                // An extended opcode; the length prefix makes
                // unrecognized ones skippable.
                let len = data.read_u64_leb128()?;
                let mut operands = data.read_slice(usize::try_from(len).ok()?)?;
                let ext_opcode = operands.read_u8()?;
                match ext_opcode {
                    DW_LNE_END_SEQUENCE => {
                        row.end_sequence = true;
                        Some(true)
                    }
                    DW_LNE_SET_ADDRESS => {
                        row.address = match operands.len() {
                            4 => u64::from(operands.read_u32()?),
                            8 => operands.read_u64()?,
                            _ => return None,
                        };
                        Some(false)
                    }
                    // Discriminators and vendor extensions carry state
                    // we do not track.
                    _ => Some(false),
                }
            }
            DW_LNS_COPY => Some(true),
            DW_LNS_ADVANCE_PC => {
                let adv = data.read_u64_leb128()?;
                row.address = row
                    .address
                    .wrapping_add(adv.wrapping_mul(u64::from(prologue.minimum_instruction_length)));
                Some(false)
            }
            DW_LNS_ADVANCE_LINE => {
                let adv = data.read_i64_leb128()?;
                row.line = row.line.wrapping_add(adv);
                Some(false)
            }
            DW_LNS_SET_FILE => {
                row.file = data.read_u64_leb128()?;
                Some(false)
            }
            DW_LNS_SET_COLUMN => {
                let _column = data.read_u64_leb128()?;
                Some(false)
            }
            DW_LNS_NEGATE_STMT | DW_LNS_SET_BASIC_BLOCK => Some(false),
            DW_LNS_CONST_ADD_PC => {
                let adjusted = 255 - prologue.opcode_base;
                let addr_adv = u64::from(adjusted / prologue.line_range)
                    * u64::from(prologue.minimum_instruction_length);
                row.address = row.address.wrapping_add(addr_adv);
                Some(false)
            }
            DW_LNS_FIXED_ADVANCE_PC => {
                // The one opcode whose operand is not scaled by the
                // minimum instruction length.
                let adv = data.read_u16()?;
                row.address = row.address.wrapping_add(u64::from(adv));
                Some(false)
            }
            _ => {
                // A standard opcode we do not interpret; skip its
                // operands based on the prologue's table.
                let count = self
                    .std_opcode_lengths
                    .get(usize::from(opcode) - 1)
                    .copied()?;
                for _ in 0..count {
                    let _operand = data.read_u64_leb128()?;
                }
                Some(false)
            }
        }
    }

    /// Run the unit's line number program until `addr` is covered by
    /// an emitted row.
    fn find_location(&self, addr: Addr) -> Option<Location<'mmap>> {
        let mut data = self.program;
        let mut row = Row::new();
        let mut prev: Option<Row> = None;
        // Sequences claiming to start at address zero show up in
        // practice (e.g. for eliminated code or compiler builtins) and
        // must not cover low addresses.
        let mut skip_sequence = false;

        while !data.is_empty() {
            let emit = self.step(&mut data, &mut row)?;
            if emit {
                if row.address == 0 {
                    skip_sequence = true;
                }
                if !skip_sequence {
                    if let Some(prev_row) = prev {
                        if !prev_row.end_sequence
                            && prev_row.address <= addr
                            && addr < row.address
                        {
                            return self.stringify(&prev_row)
                        }
                    }
                    if row.address == addr && !row.end_sequence {
                        return self.stringify(&row)
                    }
                    prev = Some(row);
                }
                if row.end_sequence {
                    row = Row::new();
                    prev = None;
                    skip_sequence = false;
                }
            }
        }
        None
    }

    /// Convert a row into a [`Location`], resolving file and directory
    /// indices.
    fn stringify(&self, row: &Row) -> Option<Location<'mmap>> {
        // File index zero (or one out of range) has no name associated
        // with it.
        let file = usize::try_from(row.file)
            .ok()
            .and_then(|idx| idx.checked_sub(1))
            .and_then(|idx| self.files.get(idx));
        let (dir, file) = match file {
            Some(file) => {
                let dir = usize::try_from(file.dir)
                    .ok()
                    .and_then(|idx| idx.checked_sub(1))
                    .and_then(|idx| self.include_directories.get(idx))
                    .copied()
                    .unwrap_or("");
                (dir, file.name)
            }
            None => ("", ""),
        };
        let line = u32::try_from(row.line.max(0)).unwrap_or(u32::MAX);
        Some(Location { dir, file, line })
    }
}


/// A resolver of addresses to source locations, based on DWARF line
/// number information.
#[derive(Debug)]
pub(crate) struct LineResolver<'mmap> {
    units: Vec<LineUnit<'mmap>>,
}

impl<'mmap> LineResolver<'mmap> {
    /// Parse the `.debug_line` section of the provided ELF file, if
    /// present.
    pub(crate) fn parse(parser: &'mmap ElfParser) -> Result<Option<LineResolver<'mmap>>> {
        let idx = match parser.find_section(".debug_line")? {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let data = parser.section_data(idx)?;
        let slf = Self::from_section(data)?;
        Ok(Some(slf))
    }

    /// Parse raw `.debug_line` section contents.
    fn from_section(mut data: &'mmap [u8]) -> Result<LineResolver<'mmap>> {
        let mut units = Vec::new();
        while !data.is_empty() {
            let unit_length = data
                .read_u32()
                .ok_or_invalid_data(|| "failed to read .debug_line unit length")?;
            if unit_length == 0xffff_ffff {
                return Err(Error::with_unsupported("64 bit DWARF is not supported"))
            }
            let unit = data
                .read_slice(unit_length as usize)
                .ok_or_invalid_data(|| ".debug_line unit is truncated")?;
            match Self::parse_unit(unit) {
                Ok(Some(unit)) => {
                    let () = units.push(unit);
                }
                // Units of an unsupported version do not prevent use
                // of the remaining ones.
                Ok(None) => (),
                Err(err) => {
                    log::debug!("ignoring malformed .debug_line unit: {err}");
                }
            }
        }
        Ok(LineResolver { units })
    }

    /// Parse a single unit, sans its length prefix.
    ///
    /// Returns `None` for units of a version that we do not interpret.
    fn parse_unit(mut unit: &'mmap [u8]) -> Result<Option<LineUnit<'mmap>>> {
        let version = unit
            .read_u16()
            .ok_or_invalid_data(|| "failed to read .debug_line version")?;
        if !(2..=4).contains(&version) {
            return Ok(None)
        }
        let header_length = unit
            .read_u32()
            .ok_or_invalid_data(|| "failed to read .debug_line header length")?;
        // `header_length` counts from right past itself to the first
        // byte of the program.
        let program = unit
            .get(header_length as usize..)
            .ok_or_invalid_data(|| ".debug_line header length out of bounds")?;
        let mut header = unit;

        let minimum_instruction_length = header
            .read_u8()
            .ok_or_invalid_data(|| "failed to read .debug_line prologue")?;
        if version >= 4 {
            let max_ops = header
                .read_u8()
                .ok_or_invalid_data(|| "failed to read .debug_line prologue")?;
            if max_ops != 1 {
                // VLIW target encodings are not supported.
                return Ok(None)
            }
        }
        let _default_is_stmt = header
            .read_u8()
            .ok_or_invalid_data(|| "failed to read .debug_line prologue")?;
        let line_base = header
            .read_u8()
            .ok_or_invalid_data(|| "failed to read .debug_line prologue")?
            as i8;
        let line_range = header
            .read_u8()
            .ok_or_invalid_data(|| "failed to read .debug_line prologue")?;
        let opcode_base = header
            .read_u8()
            .ok_or_invalid_data(|| "failed to read .debug_line prologue")?;
        if line_range == 0 || opcode_base == 0 {
            return Err(Error::with_invalid_data("invalid .debug_line prologue"))
        }
        let std_opcode_lengths = header
            .read_slice(usize::from(opcode_base) - 1)
            .ok_or_invalid_data(|| "failed to read standard opcode lengths")?;

        let mut include_directories = Vec::new();
        loop {
            if header.first() == Some(&0) {
                let _terminator = header.read_u8();
                break
            }
            let dir = header
                .read_cstr()
                .ok_or_invalid_data(|| "failed to read include directory")?
                .to_str()
                .map_err(Error::with_invalid_data)
                .context("invalid include directory")?;
            let () = include_directories.push(dir);
        }

        let mut files = Vec::new();
        loop {
            if header.first() == Some(&0) {
                break
            }
            let name = header
                .read_cstr()
                .ok_or_invalid_data(|| "failed to read file table entry")?
                .to_str()
                .map_err(Error::with_invalid_data)
                .context("invalid file name")?;
            let dir = header
                .read_u64_leb128()
                .ok_or_invalid_data(|| "failed to read directory index")?;
            let _mtime = header
                .read_u64_leb128()
                .ok_or_invalid_data(|| "failed to read file modification time")?;
            let _size = header
                .read_u64_leb128()
                .ok_or_invalid_data(|| "failed to read file size")?;
            let () = files.push(FileEntry { name, dir });
        }

        let prologue = Prologue {
            minimum_instruction_length,
            line_base,
            line_range,
            opcode_base,
        };
        Ok(Some(LineUnit {
            prologue,
            std_opcode_lengths,
            include_directories,
            files,
            program,
        }))
    }

    /// Find the source location covering `addr`, a file relative
    /// address.
    pub(crate) fn find_location(&self, addr: Addr) -> Option<Location<'mmap>> {
        self.units.iter().find_map(|unit| unit.find_location(addr))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    const STD_OPCODE_LENGTHS: &[u8] = &[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

    fn test_unit(program: &[u8]) -> LineUnit<'_> {
        LineUnit {
            prologue: Prologue {
                minimum_instruction_length: 1,
                line_base: -5,
                line_range: 14,
                opcode_base: 13,
            },
            std_opcode_lengths: STD_OPCODE_LENGTHS,
            include_directories: vec!["src"],
            files: vec![FileEntry {
                name: "test.rs",
                dir: 1,
            }],
            program,
        }
    }

    /// Resolve addresses against a short program with known rows:
    /// line 545 at 0x18b30, line 547 at 0x18b43, sequence end at
    /// 0x18b48.
    #[test]
    fn lookup_in_short_sequence() {
        let program = [
            0x00, 0x09, 0x02, 0x30, 0x8b, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xa0, 0x04,
            0x01, 0x05, 0x06, 0x0a, 0x08, 0x30, 0x02, 0x05, 0x00, 0x01, 0x01,
        ];
        let unit = test_unit(&program);

        let location = unit.find_location(0x18b30).unwrap();
        assert_eq!(location.line, 545);
        assert_eq!(location.file, "test.rs");
        assert_eq!(location.dir, "src");

        // In between two rows the earlier one covers.
        assert_eq!(unit.find_location(0x18b35).unwrap().line, 545);
        assert_eq!(unit.find_location(0x18b42).unwrap().line, 545);
        assert_eq!(unit.find_location(0x18b43).unwrap().line, 547);
        assert_eq!(unit.find_location(0x18b47).unwrap().line, 547);

        // The end-of-sequence row is the first address past the last
        // instruction and must not match.
        assert_eq!(unit.find_location(0x18b48), None);
        // Before the sequence.
        assert_eq!(unit.find_location(0x18b2f), None);
    }

    /// Resolve addresses against a longer program exercising special
    /// opcodes, `const_add_pc`, and line decrements.
    #[test]
    fn lookup_in_long_sequence() {
        // Rows (from an actual line table):
        //   789 0x18c70    791 0x18c7c    791 0x18c81    790 0x18c86
        //     0 0x18c88    791 0x18c8c      0 0x18c95    792 0x18c99
        //   ...            790 0x18cce    794 0x18cd0    end 0x18cde
        let program = [
            0x00, 0x09, 0x02, 0x70, 0x8c, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x94, 0x06,
            0x01, 0x05, 0x0d, 0x0a, 0xbc, 0x05, 0x26, 0x06, 0x58, 0x05, 0x09, 0x06, 0x57, 0x06,
            0x03, 0xea, 0x79, 0x2e, 0x05, 0x13, 0x06, 0x03, 0x97, 0x06, 0x4a, 0x06, 0x03, 0xe9,
            0x79, 0x90, 0x05, 0x0d, 0x06, 0x03, 0x98, 0x06, 0x4a, 0x05, 0x12, 0x06, 0x4a, 0x03,
            0xe8, 0x79, 0x74, 0x05, 0x13, 0x06, 0x03, 0x97, 0x06, 0x4a, 0x05, 0x12, 0x75, 0x06,
            0x03, 0xe8, 0x79, 0x74, 0x05, 0x20, 0x03, 0x98, 0x06, 0x4a, 0x03, 0xe8, 0x79, 0x9e,
            0x05, 0x12, 0x03, 0x98, 0x06, 0x4a, 0x05, 0x09, 0x06, 0x64, 0x05, 0x06, 0x32, 0x02,
            0x0e, 0x00, 0x01, 0x01,
        ];
        let unit = test_unit(&program);

        assert_eq!(unit.find_location(0x18c70).unwrap().line, 789);
        assert_eq!(unit.find_location(0x18c72).unwrap().line, 789);
        assert_eq!(unit.find_location(0x18c7c).unwrap().line, 791);
        assert_eq!(unit.find_location(0x18c86).unwrap().line, 790);
        assert_eq!(unit.find_location(0x18cce).unwrap().line, 790);
        assert_eq!(unit.find_location(0x18cd0).unwrap().line, 794);
        // Covered until the sequence end at 0x18cde...
        assert_eq!(unit.find_location(0x18cdd).unwrap().line, 794);
        // ...but not at or beyond it.
        assert_eq!(unit.find_location(0x18cde), None);
        assert_eq!(unit.find_location(0x18cec), None);
    }

    /// Check that a row with file index zero resolves to an empty file
    /// name.
    #[test]
    fn lookup_with_zero_file_index() {
        let mut program = vec![0x00, 0x09, 0x02];
        let () = program.extend_from_slice(&0x2000u64.to_le_bytes());
        let () = program.extend_from_slice(&[
            0x04, 0x00, // set_file 0
            0x03, 0x07, // advance_line +7
            0x01, // copy
            0x02, 0x10, // advance_pc 0x10
            0x00, 0x01, 0x01, // end_sequence
        ]);
        let unit = test_unit(&program);

        let location = unit.find_location(0x2008).unwrap();
        assert_eq!(location.dir, "");
        assert_eq!(location.file, "");
        assert_eq!(location.line, 8);
    }

    /// Make sure that unsupported units are skipped while supported
    /// ones remain usable.
    #[test]
    fn section_with_mixed_versions() {
        // A DWARF 5 unit, which we do not interpret.
        let mut section = Vec::new();
        let v5_body = [5u16.to_le_bytes().as_slice(), &[0u8; 6]].concat();
        let () = section.extend_from_slice(&(v5_body.len() as u32).to_le_bytes());
        let () = section.extend_from_slice(&v5_body);

        // A DWARF 2 unit with a single sequence: line 5 at 0x500.
        let mut unit = Vec::new();
        let () = unit.extend_from_slice(&2u16.to_le_bytes()); // version
        let header_len_off = unit.len();
        let () = unit.extend_from_slice(&[0u8; 4]); // header_length
        let () = unit.push(1); // minimum_instruction_length
        let () = unit.push(1); // default_is_stmt
        let () = unit.push(0xfb); // line_base (-5)
        let () = unit.push(14); // line_range
        let () = unit.push(13); // opcode_base
        let () = unit.extend_from_slice(STD_OPCODE_LENGTHS);
        let () = unit.extend_from_slice(b"\0"); // no include directories
        let () = unit.extend_from_slice(b"five.c\0\x00\x00\x00\0"); // file table
        let header_len = (unit.len() - header_len_off - 4) as u32;
        unit[header_len_off..header_len_off + 4].copy_from_slice(&header_len.to_le_bytes());
        let () = unit.extend_from_slice(&[0x00, 0x09, 0x02]); // set_address
        let () = unit.extend_from_slice(&0x500u64.to_le_bytes());
        let () = unit.extend_from_slice(&[
            0x03, 0x04, // advance_line +4
            0x01, // copy
            0x02, 0x10, // advance_pc 0x10
            0x00, 0x01, 0x01, // end_sequence
        ]);
        let () = section.extend_from_slice(&(unit.len() as u32).to_le_bytes());
        let () = section.extend_from_slice(&unit);

        let resolver = LineResolver::from_section(&section).unwrap();
        assert_eq!(resolver.units.len(), 1);

        let location = resolver.find_location(0x508).unwrap();
        assert_eq!(location.file, "five.c");
        assert_eq!(location.dir, "");
        assert_eq!(location.line, 5);

        assert_eq!(resolver.find_location(0x510), None);
        assert_eq!(resolver.find_location(0x4ff), None);
    }
}
