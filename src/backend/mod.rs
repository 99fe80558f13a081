//! The backend allocates registers for the optimized IR and lowers it to
//! 32-bit x86 assembly in GNU-assembler syntax.

use std::path::Path;

use crate::middle::ir;
use target::CodeGenerator;

pub mod regalloc;
pub mod target;

use target::Target;

#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    pub target: Target,
    /// Embed the textual IR as assembly comments
    pub emit_debug_info: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            target: Target::X86LinuxGnu,
            emit_debug_info: true,
        }
    }
}

/// Translates the module to assembly text for the configured target
pub fn generate_assembly(module: &ir::Module, options: &CodegenOptions) -> String {
    options
        .target
        .get_code_generator()
        .translate_to_asm(module, options)
}

/// Translates the module and writes the `.s` file. A partially written
/// file is removed on failure so later stages never consume it.
pub fn codegen_module(
    module: &ir::Module,
    output_path: &Path,
    options: &CodegenOptions,
) -> std::io::Result<()> {
    let assembly = generate_assembly(module, options);

    std::fs::write(output_path, assembly).inspect_err(|_| {
        let _ = std::fs::remove_file(output_path);
    })
}
