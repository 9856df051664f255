//! DOS and COFF headers. Write-only: this binary never parses an existing
//! PE, so every struct here only needs `Pwrite`/`SizeWith`, not `Pread`.

use scroll::{Pwrite, SizeWith};

/// `IMAGE_DOS_HEADER`, trimmed to the two fields Windows still looks at
/// (`e_magic`, `e_lfanew`) plus padding out to the conventional 64 bytes —
/// everything else is DOS-era cruft no loader reads anymore.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Pwrite, SizeWith)]
pub struct DosHeader {
    pub signature: u16,
    pub bytes_on_last_page: u16,
    pub pages_in_file: u16,
    pub relocations: u16,
    pub size_of_header_in_paragraphs: u16,
    pub minimum_extra_paragraphs_needed: u16,
    pub maximum_extra_paragraphs_needed: u16,
    pub initial_relative_ss: u16,
    pub initial_sp: u16,
    pub checksum: u16,
    pub initial_ip: u16,
    pub initial_relative_cs: u16,
    pub file_address_of_relocation_table: u16,
    pub overlay_number: u16,
    pub reserved: [u16; 4],
    pub oem_id: u16,
    pub oem_info: u16,
    pub reserved2: [u16; 10],
    /// `e_lfanew`: file offset of the PE NT headers.
    pub pe_pointer: u32,
}

impl Default for DosHeader {
    fn default() -> Self {
        DosHeader {
            signature: DOS_MAGIC,
            bytes_on_last_page: 0x90,
            pages_in_file: 3,
            relocations: 0,
            size_of_header_in_paragraphs: 4,
            minimum_extra_paragraphs_needed: 0,
            maximum_extra_paragraphs_needed: 0xFFFF,
            initial_relative_ss: 0,
            initial_sp: 0xb8,
            checksum: 0,
            initial_ip: 0,
            initial_relative_cs: 0,
            file_address_of_relocation_table: 0x40,
            overlay_number: 0,
            reserved: [0; 4],
            oem_id: 0,
            oem_info: 0,
            reserved2: [0; 10],
            pe_pointer: NT_HEADERS_OFFSET,
        }
    }
}

/// `[0x5A, 0x4D]` little-endian, "MZ" for Mark Zbikowski.
pub const DOS_MAGIC: u16 = 0x5A4D;
/// Where this writer always places the NT headers — the DOS stub region
/// between the DOS header and here is zero-padded.
pub const NT_HEADERS_OFFSET: u32 = 0x100;
/// `PE\0\0`, little-endian.
pub const PE_MAGIC: u32 = 0x0000_4550;

/// COFF file header, immediately following the four-byte PE signature.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pwrite, SizeWith)]
pub struct CoffHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

pub const MACHINE_AMD64: u16 = 0x8664;

/// `IMAGE_FILE_RELOCS_STRIPPED | IMAGE_FILE_EXECUTABLE_IMAGE | IMAGE_FILE_LARGE_ADDRESS_AWARE`.
pub const CHARACTERISTICS_EXECUTABLE: u16 = 0x0001 | 0x0002 | 0x0020;
