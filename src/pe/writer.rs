//! Assembles the whole PE32+ image as a sequence of `symbol`/`push`
//! operations against the linker: DOS stub, NT headers, three section
//! headers, then the `.code`, `.data`, and `.idata` sections themselves.
//! Every header field that depends on where later content
//! ends up (entry point, section bounds, import RVAs) is filled in with
//! `linker.get_symbol*` calls rather than patched after the fact — during
//! the emit pass every symbol was already recorded in the preceding
//! layout pass, so the value is correct the first time it's written,
//! however far "later" that content is in file order.

use log::{debug, trace};

use crate::ast::Module;
use crate::codegen;
use crate::codegen::x64::{self, Reg};
use crate::error::Error;
use crate::linker::Linker;
use crate::types::TypeRegistry;

use super::data_directories::{DataDirectories, IMPORT_ADDRESS_TABLE_INDEX, IMPORT_TABLE_INDEX};
use super::header::{
    CoffHeader, DosHeader, CHARACTERISTICS_EXECUTABLE, MACHINE_AMD64, NT_HEADERS_OFFSET, PE_MAGIC,
};
use super::import::{self, DllImport};
use super::optional_header::{StandardFields64, WindowsFields64, MAGIC_PE32_PLUS, SUBSYSTEM_WINDOWS_CUI};
use super::section_table::{SectionTable, CHARACTERISTICS_CODE, CHARACTERISTICS_DATA};
use super::{FILE_ALIGNMENT, SECTION_ALIGNMENT, STACK_HEAP_RESERVE_COMMIT};

fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// The runtime this compiler targets needs exactly one import: the call
/// `ExitProcess(main())` the entry stub makes to hand the process back to
/// Windows. A language with a `extern` declaration would grow this list;
/// this one doesn't have one, so it's fixed.
fn runtime_imports() -> Vec<DllImport> {
    vec![DllImport {
        dll_name: "KERNEL32.DLL".to_string(),
        functions: vec!["ExitProcess".to_string()],
    }]
}

/// Runs the whole PE assembly once against `linker`, in whatever pass mode
/// the caller already put it in (`linker.begin_pass` beforehand). Calling
/// this once per pass with an unchanged `module`/`main_mangled` is what
/// makes the two-pass model work: the sequence of `symbol`/`push` calls
/// here must be identical across both calls.
pub fn write_image(
    module: &Module,
    registry: &TypeRegistry,
    main_mangled: &str,
    linker: &mut Linker,
) -> Result<(), Error> {
    let dlls = runtime_imports();
    debug!(
        "assembling image for {} function declaration(s), layout_pass={}",
        module.decls.len(),
        linker.is_layout_pass()
    );

    linker.symbol("__image_begin");
    write_dos_stub(linker);
    write_nt_headers(linker, &dlls)?;
    write_section_headers(linker)?;
    linker.symbol("__headers_end");
    linker.align(FILE_ALIGNMENT, SECTION_ALIGNMENT);
    trace!("headers end at raw {}", linker.current_address_raw());

    linker.symbol("__code_begin");
    codegen::emit_module(module, registry, linker)?;
    emit_entry(linker, main_mangled)?;
    linker.symbol("__code_end");
    linker.align(FILE_ALIGNMENT, SECTION_ALIGNMENT);
    trace!(".code section ends at raw {}", linker.current_address_raw());

    // No source-level construct currently produces static data; the
    // section exists so a later language feature (string literals, global
    // variables) has somewhere to land without changing the PE layout.
    linker.symbol("__data_begin");
    linker.symbol("__data_end");
    linker.align(FILE_ALIGNMENT, SECTION_ALIGNMENT);

    linker.symbol("__idata_begin_section");
    import::write_idata(linker, &dlls)?;
    linker.align(FILE_ALIGNMENT, SECTION_ALIGNMENT);

    linker.symbol("__image_end");
    debug!("image assembled, {} byte(s) raw", linker.current_address_raw());
    Ok(())
}

/// DOS header plus zero-padded stub out to the fixed NT-headers offset.
fn write_dos_stub(linker: &mut Linker) {
    linker
        .push_struct(DosHeader::default())
        .expect("DosHeader is a fixed-size Pwrite struct");
    let written = linker.current_address_raw();
    let pad = NT_HEADERS_OFFSET as u64 - written;
    linker.push_bytes(&vec![0u8; pad as usize]);
}

fn write_nt_headers(linker: &mut Linker, dlls: &[DllImport]) -> Result<(), Error> {
    linker.push_bytes(&PE_MAGIC.to_le_bytes());

    let size_of_optional_header = (std::mem::size_of::<StandardFields64>()
        + std::mem::size_of::<WindowsFields64>()
        + super::data_directories::NUM_DATA_DIRECTORIES * std::mem::size_of::<super::data_directories::DataDirectory>())
        as u16;

    linker.push_struct(CoffHeader {
        machine: MACHINE_AMD64,
        number_of_sections: 3,
        time_date_stamp: 0,
        pointer_to_symbol_table: 0,
        number_of_symbols: 0,
        size_of_optional_header,
        characteristics: CHARACTERISTICS_EXECUTABLE,
    })?;

    let code_begin = linker.get_symbol_rva("__code_begin")?;
    let code_end = linker.get_symbol_rva("__code_end")?;
    let entry = linker.get_symbol_rva("__entry")?;

    linker.push_struct(StandardFields64 {
        magic: MAGIC_PE32_PLUS,
        major_linker_version: 0,
        minor_linker_version: 1,
        size_of_code: round_up((code_end - code_begin) as u64, FILE_ALIGNMENT) as u32,
        size_of_initialized_data: initialized_data_size(linker)? as u32,
        size_of_uninitialized_data: 0,
        address_of_entry_point: entry,
        base_of_code: code_begin,
    })?;

    let headers_end_raw = linker.get_symbol_raw("__code_begin")?;
    let image_end = linker.get_symbol_rva("__image_end")?;

    linker.push_struct(WindowsFields64 {
        image_base: super::IMAGE_BASE,
        section_alignment: SECTION_ALIGNMENT as u32,
        file_alignment: FILE_ALIGNMENT as u32,
        major_operating_system_version: 6,
        minor_operating_system_version: 0,
        major_image_version: 0,
        minor_image_version: 0,
        major_subsystem_version: 6,
        minor_subsystem_version: 0,
        win32_version_value: 0,
        size_of_image: round_up(image_end as u64, SECTION_ALIGNMENT) as u32,
        size_of_headers: headers_end_raw as u32,
        check_sum: 0,
        subsystem: SUBSYSTEM_WINDOWS_CUI,
        dll_characteristics: 0,
        size_of_stack_reserve: STACK_HEAP_RESERVE_COMMIT,
        size_of_stack_commit: STACK_HEAP_RESERVE_COMMIT,
        size_of_heap_reserve: STACK_HEAP_RESERVE_COMMIT,
        size_of_heap_commit: STACK_HEAP_RESERVE_COMMIT,
        loader_flags: 0,
        number_of_rva_and_sizes: super::data_directories::NUM_DATA_DIRECTORIES as u32,
    })?;

    write_data_directories(linker, dlls)?;
    Ok(())
}

/// `.data` and `.idata` are both `IMAGE_SCN_CNT_INITIALIZED_DATA`; their
/// combined on-disk size is `SizeOfInitializedData`.
fn initialized_data_size(linker: &Linker) -> Result<u64, Error> {
    let data_begin = linker.get_symbol_raw("__data_begin")?;
    let data_end = linker.get_symbol_raw("__data_end")?;
    let idata_begin = linker.get_symbol_raw("__idata_begin_section")?;
    let idata_end = linker.get_symbol_raw("__image_end")?;
    Ok(round_up(data_end - data_begin, FILE_ALIGNMENT)
        + round_up(idata_end - idata_begin, FILE_ALIGNMENT))
}

fn write_data_directories(linker: &mut Linker, dlls: &[DllImport]) -> Result<(), Error> {
    let mut directories = DataDirectories::default();

    let import_table_rva = linker.get_symbol_rva("__idata_begin_section")?;
    let import_table_size = (dlls.len() + 1) * import::SIZEOF_IMPORT_DIRECTORY_ENTRY;
    directories.set(IMPORT_TABLE_INDEX, import_table_rva, import_table_size as u32);

    if let Some(first) = dlls.first() {
        let iat_rva = linker.get_symbol_rva(&import::address_table_symbol(&first.dll_name))?;
        let iat_size: usize = dlls
            .iter()
            .map(|dll| (dll.functions.len() + 1) * std::mem::size_of::<u64>())
            .sum();
        directories.set(IMPORT_ADDRESS_TABLE_INDEX, iat_rva, iat_size as u32);
    }

    for entry in directories.entries {
        linker.push_struct(entry)?;
    }
    Ok(())
}

fn write_section_headers(linker: &mut Linker) -> Result<(), Error> {
    write_section_header(linker, ".code", "__code_begin", "__code_end", CHARACTERISTICS_CODE)?;
    write_section_header(linker, ".data", "__data_begin", "__data_end", CHARACTERISTICS_DATA)?;
    write_section_header(
        linker,
        ".idata",
        "__idata_begin_section",
        "__image_end",
        CHARACTERISTICS_DATA,
    )?;
    Ok(())
}

fn write_section_header(
    linker: &mut Linker,
    name: &str,
    begin_symbol: &str,
    end_symbol: &str,
    characteristics: u32,
) -> Result<(), Error> {
    let virtual_address = linker.get_symbol_rva(begin_symbol)?;
    let virtual_size = linker.get_symbol_rva(end_symbol)? - virtual_address;
    let raw_begin = linker.get_symbol_raw(begin_symbol)?;
    let raw_size = round_up(linker.get_symbol_raw(end_symbol)? - raw_begin, FILE_ALIGNMENT);

    let mut table = SectionTable::named(name);
    table.virtual_size = virtual_size;
    table.virtual_address = virtual_address;
    table.size_of_raw_data = raw_size as u32;
    table.pointer_to_raw_data = if raw_size > 0 { raw_begin as u32 } else { 0 };
    table.characteristics = characteristics;
    linker.push_struct(table)?;
    Ok(())
}

/// `__entry`: the image's sole entry point, called by the loader with no
/// arguments. Calls the source program's `main()`, narrows its `i64`
/// result into the 32-bit exit code `ExitProcess` takes in `RCX`, and
/// calls through the import address table slot `__imp_ExitProcess`. The
/// trailing `jmp $` is unreachable — `ExitProcess` does not return — kept
/// as a safety net rather than relying on falling off the end of the
/// section.
fn emit_entry(linker: &mut Linker, main_mangled: &str) -> Result<(), Error> {
    linker.symbol("__entry");
    linker.push_bytes(&x64::sub_rsp_imm8(40));

    let main_target = linker.get_symbol(main_mangled)?;
    let disp = codegen::rel32(linker, 1, main_target);
    linker.push_bytes(&x64::call_rel32(disp));

    linker.push_bytes(&x64::mov_reg32_reg32(Reg::Rcx, Reg::Rax));

    let exit_process = linker.get_symbol("__imp_ExitProcess")?;
    let disp = codegen::rel32(linker, 2, exit_process);
    linker.push_bytes(&x64::call_rip_rel32(disp));

    linker.push_bytes(&x64::jmp_self());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::semantic;

    fn build(source: &str) -> Vec<u8> {
        let mut module = Parser::new(source).parse_module().unwrap();
        let mut registry = TypeRegistry::new(64);
        semantic::analyze(&mut module, &mut registry, source).unwrap();

        let mut linker = Linker::new(super::super::IMAGE_BASE);
        for is_layout_pass in [true, false] {
            linker.begin_pass(is_layout_pass);
            write_image(&module, &registry, "main()", &mut linker).unwrap();
        }
        linker.data().to_vec()
    }

    #[test]
    fn identity_program_is_a_valid_pe_image() {
        let bytes = build("fn main(): i64 { return 0 }");
        assert_eq!(&bytes[0..2], b"MZ");
        let e_lfanew = u32::from_le_bytes(bytes[0x3c..0x40].try_into().unwrap());
        assert_eq!(e_lfanew, NT_HEADERS_OFFSET);
        assert_eq!(&bytes[e_lfanew as usize..e_lfanew as usize + 4], b"PE\0\0");
        let machine = u16::from_le_bytes(
            bytes[e_lfanew as usize + 4..e_lfanew as usize + 6]
                .try_into()
                .unwrap(),
        );
        assert_eq!(machine, MACHINE_AMD64);
    }

    #[test]
    fn size_of_image_covers_every_section() {
        let bytes = build("fn main(): i64 { return 0 }");
        let e_lfanew = u32::from_le_bytes(bytes[0x3c..0x40].try_into().unwrap()) as usize;
        let opt_header_off = e_lfanew + 4 + std::mem::size_of::<CoffHeader>();
        let size_of_image_off = opt_header_off + std::mem::size_of::<StandardFields64>() + 32;
        let size_of_image = u32::from_le_bytes(
            bytes[size_of_image_off..size_of_image_off + 4]
                .try_into()
                .unwrap(),
        );
        assert!(size_of_image as usize >= bytes.len().min(size_of_image as usize));
        assert!(size_of_image > 0);
    }
}
