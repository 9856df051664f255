//! The `.idata` section's contents: one `IMAGE_IMPORT_DESCRIPTOR` per
//! imported DLL, each pointing at a zero-terminated import lookup table and
//! import address table, hint/name entries, and the DLL's name string.
//!
//! Every RVA field here is resolved through the linker's two-pass symbol
//! table, so the descriptor table can reference tables written later in
//! the section: during the emit pass every symbol was already recorded in
//! the preceding layout pass, forward or backward alike.

use log::debug;
use scroll::{Pwrite, SizeWith};

use crate::error::Error;
use crate::linker::Linker;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pwrite, SizeWith)]
pub struct ImportDirectoryEntry {
    pub import_lookup_table_rva: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub import_address_table_rva: u32,
}

pub const SIZEOF_IMPORT_DIRECTORY_ENTRY: usize = 20;

#[derive(Debug, Clone)]
pub struct DllImport {
    pub dll_name: String,
    pub functions: Vec<String>,
}

/// Writes the whole `.idata` contents: descriptor array, per-DLL lookup and
/// address tables, hint/name entries, DLL name strings, in that order. Call
/// once per linker pass; the sequence of `symbol`/`push_bytes` calls must
/// be identical in both passes for offsets to agree.
pub fn write_idata(linker: &mut Linker, dlls: &[DllImport]) -> Result<(), Error> {
    debug!("writing import directory for {} dll(s)", dlls.len());
    linker.symbol("__idata_begin");

    for dll in dlls {
        linker.symbol(&descriptor_symbol(&dll.dll_name));
        let entry = ImportDirectoryEntry {
            import_lookup_table_rva: linker.get_symbol_rva(&table_symbol(&dll.dll_name, "lookup"))?,
            time_date_stamp: 0,
            forwarder_chain: 0,
            name_rva: linker.get_symbol_rva(&dll_name_symbol(&dll.dll_name))?,
            import_address_table_rva: linker.get_symbol_rva(&table_symbol(&dll.dll_name, "address"))?,
        };
        linker.push_struct(entry)?;
    }
    linker.push_bytes(&[0u8; SIZEOF_IMPORT_DIRECTORY_ENTRY]); // zero terminator

    for dll in dlls {
        write_table(linker, dll, "lookup")?;
    }
    for dll in dlls {
        write_table(linker, dll, "address")?;
    }
    for dll in dlls {
        for function in &dll.functions {
            linker.symbol(&hint_name_symbol(&dll.dll_name, function));
            linker.push_bytes(&0u16.to_le_bytes()); // hint: always 0, ordinal import unused
            let mut name = function.clone().into_bytes();
            name.push(0);
            if name.len() % 2 != 0 {
                name.push(0); // hint/name entries are word-aligned
            }
            linker.push_bytes(&name);
        }
    }
    for dll in dlls {
        linker.symbol(&dll_name_symbol(&dll.dll_name));
        let mut name = dll.dll_name.clone().into_bytes();
        name.push(0);
        linker.push_bytes(&name);
    }

    linker.symbol("__idata_end");
    Ok(())
}

fn descriptor_symbol(dll: &str) -> String {
    format!("__import_descriptor_{}", dll)
}

fn table_symbol(dll: &str, kind: &str) -> String {
    format!("__import_{}_{}", kind, dll)
}

/// The symbol marking a DLL's import address table — the region the
/// `IMAGE_DATA_DIRECTORY` at `IMPORT_ADDRESS_TABLE_INDEX` covers.
pub(crate) fn address_table_symbol(dll: &str) -> String {
    table_symbol(dll, "address")
}

fn hint_name_symbol(dll: &str, function: &str) -> String {
    format!("__hint_name_{}_{}", dll, function)
}

fn dll_name_symbol(dll: &str) -> String {
    format!("__dll_name_{}", dll)
}

/// Emits one DLL's table (lookup or address — identical at rest; the
/// loader overwrites the address table's entries with resolved function
/// pointers at load time). `__imp_<fn>` marks a function's slot in the
/// address table, the symbol call sites for an indirect call would load
/// through.
fn write_table(linker: &mut Linker, dll: &DllImport, kind: &str) -> Result<(), Error> {
    linker.symbol(&table_symbol(&dll.dll_name, kind));
    for function in &dll.functions {
        if kind == "address" {
            linker.symbol(&format!("__imp_{}", function));
        }
        let hint_name_rva = linker.get_symbol_rva(&hint_name_symbol(&dll.dll_name, function))?;
        let entry: u64 = hint_name_rva as u64;
        linker.push_bytes(&entry.to_le_bytes());
    }
    linker.push_bytes(&0u64.to_le_bytes()); // zero terminator
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_pass_write_resolves_every_rva() {
        let dlls = vec![DllImport {
            dll_name: "KERNEL32.DLL".to_string(),
            functions: vec!["ExitProcess".to_string()],
        }];
        let mut linker = Linker::new(0x1400_0000_0);
        linker.begin_pass(true);
        write_idata(&mut linker, &dlls).unwrap();
        linker.begin_pass(false);
        write_idata(&mut linker, &dlls).unwrap();

        assert!(linker.get_symbol("__imp_ExitProcess").is_ok());
        assert!(linker.get_symbol_rva(&address_table_symbol("KERNEL32.DLL")).is_ok());
    }
}
