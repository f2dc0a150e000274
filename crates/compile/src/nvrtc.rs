//! NVRTC backend: compiles CUDA C++ to PTX through `cudarc`.

use std::ffi::{CStr, CString};
use std::ptr;

use cudarc::nvrtc::sys as nvrtc;

use crate::compiler::{CompileJob, Compiler};
use crate::error::CompileError;
use crate::module::{Module, ModuleFuture};

/// Synchronous NVRTC compiler.
///
/// Global options apply to every job; per-job options come from the kernel
/// builder. A `-std` flag is appended unless one is already present, and
/// the device's `--gpu-architecture` flag is always added.
#[derive(Debug, Default)]
pub struct NvrtcCompiler {
    global_options: Vec<String>,
}

impl NvrtcCompiler {
    pub fn new() -> Self {
        NvrtcCompiler::default()
    }

    pub fn add_option(&mut self, option: impl Into<String>) -> &mut Self {
        self.global_options.push(option.into());
        self
    }

    fn arch_flag(&self, ordinal: usize) -> Result<String, CompileError> {
        use cudarc::driver::sys::CUdevice_attribute;

        let device = cudarc::driver::CudaDevice::new(ordinal)
            .map_err(|err| CompileError::Backend(format!("{err:?}")))?;
        let major = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .map_err(|err| CompileError::Backend(format!("{err:?}")))?;
        let minor = device
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .map_err(|err| CompileError::Backend(format!("{err:?}")))?;
        Ok(format!("--gpu-architecture=compute_{major}{minor}"))
    }

    fn run(&self, job: &CompileJob) -> Result<Module, CompileError> {
        let symbol = job.symbol();
        let source = job.source.read()?;

        let mut options: Vec<String> = self
            .global_options
            .iter()
            .chain(job.options.iter())
            .cloned()
            .collect();
        if !options.iter().any(|opt| opt.starts_with("-std") || opt.starts_with("--std")) {
            options.push("-std=c++11".to_owned());
        }
        options.push(self.arch_flag(job.device_ordinal.unwrap_or(0))?);

        let source_c = to_cstring(&source)?;
        let name_c = to_cstring(job.source.file_name())?;
        let symbol_c = to_cstring(&symbol)?;
        let options_c: Vec<CString> = options
            .iter()
            .map(|opt| to_cstring(opt))
            .collect::<Result<_, _>>()?;
        let option_ptrs: Vec<*const std::os::raw::c_char> =
            options_c.iter().map(|opt| opt.as_ptr()).collect();

        unsafe {
            let mut program: nvrtc::nvrtcProgram = ptr::null_mut();
            nvrtc_check(nvrtc::nvrtcCreateProgram(
                &mut program,
                source_c.as_ptr(),
                name_c.as_ptr(),
                0,
                ptr::null(),
                ptr::null(),
            ))?;

            let result = self.compile_program(program, &symbol_c, &option_ptrs);
            let mut program = program;
            nvrtc::nvrtcDestroyProgram(&mut program);
            result
        }
    }

    unsafe fn compile_program(
        &self,
        program: nvrtc::nvrtcProgram,
        symbol: &CStr,
        options: &[*const std::os::raw::c_char],
    ) -> Result<Module, CompileError> {
        nvrtc_check(nvrtc::nvrtcAddNameExpression(program, symbol.as_ptr()))?;

        let status =
            nvrtc::nvrtcCompileProgram(program, options.len() as i32, options.as_ptr());
        if status != nvrtc::nvrtcResult::NVRTC_SUCCESS {
            let mut log_size = 0usize;
            nvrtc_check(nvrtc::nvrtcGetProgramLogSize(program, &mut log_size))?;
            let mut log = vec![0u8; log_size.max(1)];
            nvrtc_check(nvrtc::nvrtcGetProgramLog(
                program,
                log.as_mut_ptr() as *mut std::os::raw::c_char,
            ))?;
            let log = String::from_utf8_lossy(&log)
                .trim_end_matches('\0')
                .to_owned();
            return Err(CompileError::Failed { log });
        }

        let mut lowered: *const std::os::raw::c_char = ptr::null();
        nvrtc_check(nvrtc::nvrtcGetLoweredName(
            program,
            symbol.as_ptr(),
            &mut lowered,
        ))?;
        let lowered = CStr::from_ptr(lowered).to_string_lossy().into_owned();

        let mut ptx_size = 0usize;
        nvrtc_check(nvrtc::nvrtcGetPTXSize(program, &mut ptx_size))?;
        let mut ptx = vec![0u8; ptx_size];
        nvrtc_check(nvrtc::nvrtcGetPTX(
            program,
            ptx.as_mut_ptr() as *mut std::os::raw::c_char,
        ))?;

        Ok(Module {
            symbol: lowered,
            image: ptx,
        })
    }
}

impl Compiler for NvrtcCompiler {
    fn compile(&self, job: CompileJob) -> ModuleFuture {
        ModuleFuture::ready_now(self.run(&job))
    }
}

fn to_cstring(text: &str) -> Result<CString, CompileError> {
    CString::new(text)
        .map_err(|_| CompileError::Backend("interior NUL byte in compiler input".to_owned()))
}

fn nvrtc_check(status: nvrtc::nvrtcResult) -> Result<(), CompileError> {
    if status == nvrtc::nvrtcResult::NVRTC_SUCCESS {
        Ok(())
    } else {
        Err(CompileError::Backend(format!("NVRTC error: {status:?}")))
    }
}
