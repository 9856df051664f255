//! A two-pass symbolic linker: a growable byte buffer plus a symbol table
//! that maps names to (raw offset, virtual address) pairs. The code and PE
//! emitters run once in a layout pass (to learn every symbol's final
//! address without yet knowing any of them up front) and once in an emit
//! pass (where those addresses are read back to fill in displacements).

use std::collections::HashMap;

use log::trace;
use scroll::ctx::SizeWith;
use scroll::{Pwrite, LE};

use crate::error::Error;

#[derive(Debug, Clone, Copy, Default)]
struct SymbolAddr {
    raw: u64,
    virt: u64,
}

pub struct Linker {
    buf: Vec<u8>,
    raw_cursor: u64,
    virt_cursor: u64,
    is_layout_pass: bool,
    symbols: HashMap<String, SymbolAddr>,
    image_base: u64,
}

impl Linker {
    pub fn new(image_base: u64) -> Self {
        Linker {
            buf: Vec::new(),
            raw_cursor: 0,
            virt_cursor: 0,
            is_layout_pass: true,
            symbols: HashMap::new(),
            image_base,
        }
    }

    /// Resets the buffer and cursors for a fresh pass. Call once with
    /// `true` before the layout pass, once with `false` before the emit
    /// pass. The symbol table itself survives across passes — it's what
    /// the emit pass reads back.
    pub fn begin_pass(&mut self, is_layout_pass: bool) {
        self.buf.clear();
        self.raw_cursor = 0;
        self.virt_cursor = 0;
        self.is_layout_pass = is_layout_pass;
    }

    pub fn is_layout_pass(&self) -> bool {
        self.is_layout_pass
    }

    /// Records the cursor's current position under `name`. Only takes
    /// effect during the layout pass — during the emit pass the
    /// addresses are already fixed and this is a no-op, since re-recording
    /// them would just reproduce the same values at the same offsets.
    pub fn symbol(&mut self, name: &str) {
        if self.is_layout_pass {
            trace!("symbol '{}' at raw={} virt={}", name, self.raw_cursor, self.virt_cursor);
            self.symbols.insert(
                name.to_string(),
                SymbolAddr {
                    raw: self.raw_cursor,
                    virt: self.virt_cursor,
                },
            );
        }
    }

    /// The virtual address of `name`. Returns 0 during the layout pass
    /// (the address isn't known yet — nothing should branch on it then);
    /// returns the recorded address during the emit pass.
    pub fn get_symbol(&self, name: &str) -> Result<u64, Error> {
        if self.is_layout_pass {
            return Ok(0);
        }
        self.symbols
            .get(name)
            .map(|s| self.image_base + s.virt)
            .ok_or_else(|| Error::Malformed(format!("undefined symbol '{}'", name)))
    }

    /// The *relative* virtual address of `name` — the virtual offset from
    /// the image base, with no base added. PE data directory fields
    /// (`name_rva`, `import_lookup_table_rva`, ...) store RVAs, never
    /// absolute addresses.
    pub fn get_symbol_rva(&self, name: &str) -> Result<u32, Error> {
        if self.is_layout_pass {
            return Ok(0);
        }
        self.symbols
            .get(name)
            .map(|s| s.virt as u32)
            .ok_or_else(|| Error::Malformed(format!("undefined symbol '{}'", name)))
    }

    /// The raw file offset of `name` (used for directory tables that point
    /// at file content rather than loaded memory, e.g. import name tables
    /// before relocation).
    pub fn get_symbol_raw(&self, name: &str) -> Result<u64, Error> {
        if self.is_layout_pass {
            return Ok(0);
        }
        self.symbols
            .get(name)
            .map(|s| s.raw)
            .ok_or_else(|| Error::Malformed(format!("undefined symbol '{}'", name)))
    }

    /// The current virtual address (image base + virtual cursor).
    pub fn current_address(&self) -> u64 {
        self.image_base + self.virt_cursor
    }

    pub fn current_address_raw(&self) -> u64 {
        self.raw_cursor
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Independently rounds the raw and virtual cursors up to their
    /// respective alignments — file_alignment and section_alignment can
    /// differ, so the two cursors may diverge after this call. Only pads
    /// the buffer by the raw cursor's delta; the virtual cursor's delta
    /// is unbacked by file bytes (it becomes the loader's zero-fill).
    pub fn align(&mut self, raw_align: u64, virt_align: u64) {
        let new_raw = round_up(self.raw_cursor, raw_align);
        let pad = (new_raw - self.raw_cursor) as usize;
        self.buf.extend(std::iter::repeat(0u8).take(pad));
        self.raw_cursor = new_raw;
        self.virt_cursor = round_up(self.virt_cursor, virt_align);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.raw_cursor += bytes.len() as u64;
        self.virt_cursor += bytes.len() as u64;
    }

    /// Serializes a scroll-`Pwrite` struct at the current cursor and
    /// advances both cursors by its size-with(LE) — the PE writer's
    /// workhorse for header/directory structs.
    pub fn push_struct<T>(&mut self, value: T) -> Result<(), Error>
    where
        T: Pwrite<scroll::Endian> + SizeWith<scroll::Endian>,
    {
        let size = T::size_with(&LE);
        let mut tmp = vec![0u8; size];
        tmp.pwrite_with(value, 0, LE)?;
        self.push_bytes(&tmp);
        Ok(())
    }

    /// Overwrites an already-written struct at a fixed raw offset — used
    /// during the emit pass once section bounds are known, to fill in
    /// header/section-table fields that were reserved as zero bytes
    /// earlier in the same pass. A no-op during the layout pass (nothing
    /// has meaningful values yet, and the caller skips calling this then).
    pub fn patch_struct<T>(&mut self, offset: usize, value: T) -> Result<(), Error>
    where
        T: Pwrite<scroll::Endian> + SizeWith<scroll::Endian>,
    {
        let size = T::size_with(&LE);
        if offset + size > self.buf.len() {
            return Err(Error::Malformed(
                "patch_struct offset out of bounds".to_string(),
            ));
        }
        self.buf[offset..offset + size].pwrite_with(value, 0, LE)?;
        Ok(())
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_pass_records_then_emit_pass_reads_back() {
        let mut linker = Linker::new(0x1400_0000_0);
        linker.begin_pass(true);
        linker.push_bytes(&[0u8; 16]);
        linker.symbol("foo");
        assert_eq!(linker.get_symbol("foo").unwrap(), 0);

        linker.begin_pass(false);
        linker.push_bytes(&[0u8; 16]);
        linker.symbol("foo");
        assert_eq!(linker.get_symbol("foo").unwrap(), 0x1400_0000_0 + 16);
    }

    #[test]
    fn align_may_diverge_raw_and_virtual_cursors() {
        let mut linker = Linker::new(0);
        linker.begin_pass(true);
        linker.push_bytes(&[0u8; 10]);
        linker.align(0x200, 0x1000);
        assert_eq!(linker.current_address_raw(), 0x200);
        assert_eq!(linker.current_address(), 0x1000);
    }

    #[test]
    fn undefined_symbol_during_emit_pass_is_an_error() {
        let mut linker = Linker::new(0);
        linker.begin_pass(false);
        assert!(linker.get_symbol("missing").is_err());
    }
}
