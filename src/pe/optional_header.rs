//! The PE32+ optional header. This writer never targets PE32 (32-bit); the
//! `StandardFields64`/`WindowsFields64` layouts drop `base_of_data`
//! (present only in PE32) and widen the reserve/commit fields to 64 bits.

use scroll::{Pwrite, SizeWith};

pub const MAGIC_PE32_PLUS: u16 = 0x20b;

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pwrite, SizeWith)]
pub struct StandardFields64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
}

#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pwrite, SizeWith)]
pub struct WindowsFields64 {
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

pub const SUBSYSTEM_WINDOWS_CUI: u16 = 3;
