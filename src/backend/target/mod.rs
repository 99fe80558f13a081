use crate::backend::CodegenOptions;
use crate::middle::ir;

mod x86_linux_gnu;

pub trait CodeGenerator {
    fn translate_to_asm(&self, module: &ir::Module, options: &CodegenOptions) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// 32-bit x86, GNU assembler syntax, cdecl
    X86LinuxGnu,
}

impl Target {
    pub fn get_code_generator(self) -> impl CodeGenerator {
        match self {
            Target::X86LinuxGnu => x86_linux_gnu::CodeGeneratorX86LinuxGnu,
        }
    }
}
