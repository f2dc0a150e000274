//! The `Compiler` trait, job description and composition helpers.

use std::sync::Arc;

use crate::module::{Module, ModuleFuture};
use crate::source::KernelSource;
use crate::types::{CType, TemplateArg};

/// Everything a backend needs to compile one kernel instantiation.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub source: KernelSource,
    pub kernel_name: String,
    pub template_args: Vec<TemplateArg>,
    pub parameter_types: Vec<CType>,
    pub options: Vec<String>,
    /// Device to compile for; `None` means the backend's current device.
    pub device_ordinal: Option<usize>,
}

impl CompileJob {
    /// The mangled name expression of the instantiated entry point.
    pub fn symbol(&self) -> String {
        kernel_symbol(&self.kernel_name, &self.template_args, &self.parameter_types)
    }
}

/// Render the name expression `(void(*)(T1,T2,…))name<A1,A2,…>`.
pub fn kernel_symbol(
    kernel_name: &str,
    template_args: &[TemplateArg],
    parameter_types: &[CType],
) -> String {
    let params: Vec<&str> = parameter_types.iter().map(CType::name).collect();
    let mut symbol = format!("(void(*)({})){}", params.join(","), kernel_name);

    if !template_args.is_empty() {
        let args: Vec<&str> = template_args.iter().map(TemplateArg::get).collect();
        symbol.push('<');
        symbol.push_str(&args.join(","));
        symbol.push('>');
    }

    symbol
}

/// The consumed compiler boundary: source text plus options in, awaitable
/// module bytes out.
pub trait Compiler: Send + Sync {
    fn compile(&self, job: CompileJob) -> ModuleFuture;
}

/// Runs an inner compiler on a background thread per job.
///
/// The returned future resolves once the worker finishes; dropping it
/// detaches the worker and discards its result.
pub struct AsyncCompiler {
    inner: Arc<dyn Compiler>,
}

impl AsyncCompiler {
    pub fn new(inner: impl Compiler + 'static) -> Self {
        AsyncCompiler {
            inner: Arc::new(inner),
        }
    }
}

impl Compiler for AsyncCompiler {
    fn compile(&self, job: CompileJob) -> ModuleFuture {
        let inner = Arc::clone(&self.inner);
        ModuleFuture::spawn(move || inner.compile(job).wait_owned())
    }
}

/// A backend that performs no real compilation: the module image is the
/// source text and the symbol is the mangled name expression.
///
/// Pairs with the simulation device for GPU-free tests and demos.
#[derive(Debug, Default)]
pub struct SimCompiler;

impl SimCompiler {
    pub fn new() -> Self {
        SimCompiler
    }
}

impl Compiler for SimCompiler {
    fn compile(&self, job: CompileJob) -> ModuleFuture {
        let symbol = job.symbol();
        let result = job.source.read().map(|content| Module {
            symbol,
            image: content.into_bytes(),
        });
        ModuleFuture::ready_now(result)
    }
}
