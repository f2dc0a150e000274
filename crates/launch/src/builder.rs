//! Kernel builders: a configuration space bound to a kernel source.

use std::sync::Arc;

use gridtune_compile::{
    CompileJob, Compiler, CType, CTypeOf, KernelSource, TemplateArg,
};
use gridtune_space::{Config, ConfigSpace, Expr, IntoExpr, Param, SpaceError, Value};

use crate::dim::Dim3;
use crate::driver::DeviceApi;
use crate::kernel::{LaunchError, RawKernel};

/// A template-argument slot: fixed at build time or derived from the
/// configuration.
#[derive(Debug, Clone)]
enum TemplateSlot {
    Fixed(TemplateArg),
    Tuned(Expr),
}

/// A kernel source, entry-point name and expression-valued launch
/// attributes over a configuration space.
///
/// Every expression is evaluated under a concrete configuration by
/// [`compile`](KernelBuilder::compile). Assertions registered through
/// [`assertion`](KernelBuilder::assertion) also become restrictions of the
/// space, so enumeration never yields a configuration that violates them.
#[derive(Debug, Clone)]
pub struct KernelBuilder {
    space: ConfigSpace,
    source: KernelSource,
    kernel_name: String,
    block_size: [Expr; 3],
    grid_divisors: [Expr; 3],
    shared_mem: Expr,
    template_args: Vec<TemplateSlot>,
    compiler_flags: Vec<Expr>,
    defines: Vec<(String, Expr)>,
    assertions: Vec<Expr>,
}

impl KernelBuilder {
    pub fn new(source: impl Into<KernelSource>, kernel_name: impl Into<String>) -> Self {
        KernelBuilder {
            space: ConfigSpace::new(),
            source: source.into(),
            kernel_name: kernel_name.into(),
            block_size: [1u32.into_expr(), 1u32.into_expr(), 1u32.into_expr()],
            grid_divisors: [1u32.into_expr(), 1u32.into_expr(), 1u32.into_expr()],
            shared_mem: 0u32.into_expr(),
            template_args: Vec::new(),
            compiler_flags: Vec::new(),
            defines: Vec::new(),
            assertions: Vec::new(),
        }
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    pub fn source(&self) -> &KernelSource {
        &self.source
    }

    pub fn space(&self) -> &ConfigSpace {
        &self.space
    }

    /// Add a tunable parameter to the underlying space.
    pub fn tune<T: Into<Value>>(
        &mut self,
        name: &str,
        values: Vec<T>,
    ) -> Result<Param, SpaceError> {
        self.space.tune(name, values)
    }

    pub fn tune_with_default<T: Into<Value>>(
        &mut self,
        name: &str,
        values: Vec<T>,
        default: impl Into<Value>,
    ) -> Result<Param, SpaceError> {
        self.space.tune_with_default(name, values, default)
    }

    pub fn restrict(&mut self, predicate: impl IntoExpr) -> &mut Self {
        self.space.restrict(predicate);
        self
    }

    /// Set the thread-block extents. The grid divisors follow along so the
    /// default grid is one block per `block_size` elements.
    pub fn block_size(
        &mut self,
        x: impl IntoExpr,
        y: impl IntoExpr,
        z: impl IntoExpr,
    ) -> &mut Self {
        let x = x.into_expr();
        let y = y.into_expr();
        let z = z.into_expr();
        self.grid_divisors = [x.clone(), y.clone(), z.clone()];
        self.block_size = [x, y, z];
        self
    }

    /// Set the per-axis divisors used to derive the grid from the problem
    /// size: `grid_i = ceil(problem_i / divisor_i)`.
    pub fn grid_divisors(
        &mut self,
        x: impl IntoExpr,
        y: impl IntoExpr,
        z: impl IntoExpr,
    ) -> &mut Self {
        self.grid_divisors = [x.into_expr(), y.into_expr(), z.into_expr()];
        self
    }

    pub fn shared_memory(&mut self, bytes: impl IntoExpr) -> &mut Self {
        self.shared_mem = bytes.into_expr();
        self
    }

    pub fn template_arg(&mut self, arg: impl Into<TemplateArg>) -> &mut Self {
        self.template_args.push(TemplateSlot::Fixed(arg.into()));
        self
    }

    /// A template argument computed from the configuration.
    pub fn template_arg_expr(&mut self, expr: impl IntoExpr) -> &mut Self {
        self.template_args.push(TemplateSlot::Tuned(expr.into_expr()));
        self
    }

    pub fn template_type<T: CTypeOf>(&mut self) -> &mut Self {
        self.template_arg(TemplateArg::from_type::<T>())
    }

    pub fn compiler_flag(&mut self, flag: impl IntoExpr) -> &mut Self {
        self.compiler_flags.push(flag.into_expr());
        self
    }

    /// Define a preprocessor macro whose value is evaluated per
    /// configuration.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        value: impl IntoExpr,
    ) -> Result<&mut Self, LaunchError> {
        let name = name.into();
        if self.defines.iter().any(|(existing, _)| *existing == name) {
            return Err(LaunchError::DuplicateDefine(name));
        }
        self.defines.push((name, value.into_expr()));
        Ok(self)
    }

    /// Register a predicate that doubles as a restriction, so invalid
    /// configurations are filtered out before compilation.
    pub fn assertion(&mut self, predicate: impl IntoExpr) -> &mut Self {
        let expr = predicate.into_expr();
        self.space.restrict(expr.clone());
        self.assertions.push(expr);
        self
    }

    /// Tune `block_size_x/y/z` parameters and wire them as the block size.
    pub fn tune_block_size(
        &mut self,
        xs: Vec<u32>,
        ys: Vec<u32>,
        zs: Vec<u32>,
    ) -> Result<(Param, Param, Param), SpaceError> {
        let x = self.tune("block_size_x", xs)?;
        let y = self.tune("block_size_y", ys)?;
        let z = self.tune("block_size_z", zs)?;
        self.block_size(&x, &y, &z);
        Ok((x, y, z))
    }

    /// Tune a parameter that is passed straight through as a compiler flag.
    pub fn tune_compiler_flag(
        &mut self,
        name: &str,
        values: Vec<String>,
    ) -> Result<Param, SpaceError> {
        let param = self.tune(name, values)?;
        self.compiler_flag(&param);
        Ok(param)
    }

    /// Tune a parameter that is exposed to the kernel as a `#define`.
    pub fn tune_define<T: Into<Value>>(
        &mut self,
        name: &str,
        values: Vec<T>,
    ) -> Result<Param, LaunchError> {
        let param = self.tune(name, values)?;
        self.define(name.to_owned(), &param)?;
        Ok(param)
    }

    /// Evaluate every attribute under `config` and submit the compile.
    pub fn compile(
        &self,
        config: &Config,
        parameter_types: &[CType],
        compiler: &dyn Compiler,
        device: &Arc<dyn DeviceApi>,
    ) -> Result<RawKernel, LaunchError> {
        for assertion in &self.assertions {
            if !assertion.eval(config)?.to::<bool>()? {
                return Err(LaunchError::AssertionFailed(assertion.to_string()));
            }
        }

        let template_args = self
            .template_args
            .iter()
            .map(|slot| match slot {
                TemplateSlot::Fixed(arg) => Ok(arg.clone()),
                TemplateSlot::Tuned(expr) => {
                    TemplateArg::from_value(&expr.eval(config)?).map_err(LaunchError::from)
                }
            })
            .collect::<Result<Vec<_>, LaunchError>>()?;

        let mut options = Vec::new();
        for flag in &self.compiler_flags {
            options.push(flag.eval(config)?.to::<String>()?);
        }
        for (name, value) in &self.defines {
            options.push("--define-macro".to_owned());
            options.push(format!("{name}={}", value.eval(config)?.to::<String>()?));
        }

        let block_size = self.eval_dim(&self.block_size, config)?;
        let grid_divisors = self.eval_dim(&self.grid_divisors, config)?;
        if grid_divisors.x == 0 || grid_divisors.y == 0 || grid_divisors.z == 0 {
            return Err(LaunchError::Space(SpaceError::DivideByZero));
        }
        let shared_mem = self.shared_mem.eval(config)?.to::<u32>()?;

        let job = CompileJob {
            source: self.source.clone(),
            kernel_name: self.kernel_name.clone(),
            template_args,
            parameter_types: parameter_types.to_vec(),
            options,
            device_ordinal: None,
        };

        let future = compiler.compile(job);
        Ok(RawKernel::new(
            future,
            block_size,
            grid_divisors,
            shared_mem,
            Arc::clone(device),
        ))
    }

    fn eval_dim(&self, exprs: &[Expr; 3], config: &Config) -> Result<Dim3, LaunchError> {
        Ok(Dim3::new(
            exprs[0].eval(config)?.to::<u32>()?,
            exprs[1].eval(config)?.to::<u32>()?,
            exprs[2].eval(config)?.to::<u32>()?,
        ))
    }

    /// JSON description: the space plus every launch attribute.
    pub fn to_json(&self) -> serde_json::Value {
        let mut result = match self.space.to_json() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        result.insert("kernel_name".to_owned(), self.kernel_name.clone().into());
        result.insert(
            "kernel_source".to_owned(),
            self.source.file_name().to_owned().into(),
        );
        result.insert(
            "block_size".to_owned(),
            self.block_size.iter().map(Expr::to_json).collect(),
        );
        result.insert(
            "grid_divisors".to_owned(),
            self.grid_divisors.iter().map(Expr::to_json).collect(),
        );
        result.insert("shared_mem".to_owned(), self.shared_mem.to_json());
        result.insert(
            "compiler_flags".to_owned(),
            self.compiler_flags.iter().map(Expr::to_json).collect(),
        );

        let mut defines = serde_json::Map::new();
        for (name, value) in &self.defines {
            defines.insert(name.clone(), value.to_json());
        }
        result.insert("defines".to_owned(), serde_json::Value::Object(defines));

        serde_json::Value::Object(result)
    }
}
