//! CUDA driver backend built on `cudarc`.

use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::Arc;

use cudarc::driver::sys;
use cudarc::driver::CudaDevice;

use gridtune_compile::Module;

use crate::args::KernelArg;
use crate::dim::Dim3;
use crate::driver::{DeviceApi, DeviceIdentity, DeviceKernel, DriverError, GpuTimer, Stream};

const MAX_ARGS: usize = 64;

fn check(status: sys::CUresult) -> Result<(), DriverError> {
    if status == sys::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(DriverError::new(format!("{status:?}")))
    }
}

/// One CUDA device, addressed through the driver API.
pub struct CudaApi {
    device: Arc<CudaDevice>,
}

impl CudaApi {
    pub fn new(ordinal: usize) -> Result<Self, DriverError> {
        let device =
            CudaDevice::new(ordinal).map_err(|err| DriverError::new(format!("{err:?}")))?;
        Ok(CudaApi { device })
    }

    fn attribute(&self, attr: sys::CUdevice_attribute) -> Result<u32, DriverError> {
        self.device
            .attribute(attr)
            .map(|value| value as u32)
            .map_err(|err| DriverError::new(format!("{err:?}")))
    }
}

impl DeviceApi for CudaApi {
    fn identity(&self) -> Result<DeviceIdentity, DriverError> {
        let major = self.attribute(
            sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
        )?;
        let minor = self.attribute(
            sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
        )?;

        let mut driver_version = 0i32;
        unsafe {
            check(sys::lib().cuDriverGetVersion(&mut driver_version))?;
        }

        Ok(DeviceIdentity {
            device_name: self
                .device
                .name()
                .map_err(|err| DriverError::new(format!("{err:?}")))?,
            compute_capability: (major, minor),
            driver_version: driver_version as u32,
        })
    }

    fn load(&self, module: &Module) -> Result<Arc<dyn DeviceKernel>, DriverError> {
        self.device
            .bind_to_thread()
            .map_err(|err| DriverError::new(format!("{err:?}")))?;

        // the image must be NUL-terminated for the module loader
        let mut image = module.image.clone();
        if image.last() != Some(&0) {
            image.push(0);
        }
        let symbol = CString::new(module.symbol.as_str())
            .map_err(|_| DriverError::new("interior NUL byte in symbol name"))?;

        let mut raw_module: sys::CUmodule = ptr::null_mut();
        let mut function: sys::CUfunction = ptr::null_mut();
        unsafe {
            check(sys::lib().cuModuleLoadDataEx(
                &mut raw_module,
                image.as_ptr() as *const c_void,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            ))?;
            let status = sys::lib().cuModuleGetFunction(&mut function, raw_module, symbol.as_ptr());
            if status != sys::CUresult::CUDA_SUCCESS {
                sys::lib().cuModuleUnload(raw_module);
                return Err(DriverError::new(format!(
                    "symbol `{}` not found: {status:?}",
                    module.symbol
                )));
            }
        }

        Ok(Arc::new(CudaKernel {
            module: raw_module,
            function,
        }))
    }

    fn timer(&self) -> Result<Box<dyn GpuTimer>, DriverError> {
        let mut start: sys::CUevent = ptr::null_mut();
        let mut stop: sys::CUevent = ptr::null_mut();
        unsafe {
            check(sys::lib().cuEventCreate(&mut start, 0))?;
            check(sys::lib().cuEventCreate(&mut stop, 0))?;
        }
        Ok(Box::new(CudaTimer { start, stop }))
    }
}

struct CudaKernel {
    module: sys::CUmodule,
    function: sys::CUfunction,
}

// raw handles are usable from any thread holding the context
unsafe impl Send for CudaKernel {}
unsafe impl Sync for CudaKernel {}

impl DeviceKernel for CudaKernel {
    fn launch(
        &self,
        grid: Dim3,
        block: Dim3,
        shared_mem: u32,
        stream: Stream,
        args: &[KernelArg],
    ) -> Result<(), DriverError> {
        if args.len() > MAX_ARGS {
            return Err(DriverError::new(format!(
                "too many kernel arguments: {} (max {MAX_ARGS})",
                args.len()
            )));
        }

        let mut storage = [0u64; MAX_ARGS];
        let mut pointers = [ptr::null_mut::<c_void>(); MAX_ARGS];

        for (i, arg) in args.iter().enumerate() {
            let slot = &mut storage[i];
            match arg {
                KernelArg::I32(v) => *slot = *v as u32 as u64,
                KernelArg::U32(v) => *slot = *v as u64,
                KernelArg::I64(v) => *slot = *v as u64,
                KernelArg::U64(v) => *slot = *v,
                KernelArg::F32(v) => *slot = v.to_bits() as u64,
                KernelArg::F64(v) => *slot = v.to_bits(),
                KernelArg::Ptr(v) => *slot = *v,
            }
            pointers[i] = slot as *mut u64 as *mut c_void;
        }

        unsafe {
            check(sys::lib().cuLaunchKernel(
                self.function,
                grid.x,
                grid.y,
                grid.z,
                block.x,
                block.y,
                block.z,
                shared_mem,
                stream.raw() as sys::CUstream,
                pointers.as_mut_ptr(),
                ptr::null_mut(),
            ))
        }
    }
}

impl Drop for CudaKernel {
    fn drop(&mut self) {
        if !self.module.is_null() {
            unsafe {
                sys::lib().cuModuleUnload(self.module);
            }
            self.module = ptr::null_mut();
            self.function = ptr::null_mut();
        }
    }
}

struct CudaTimer {
    start: sys::CUevent,
    stop: sys::CUevent,
}

unsafe impl Send for CudaTimer {}

impl GpuTimer for CudaTimer {
    fn record_start(&mut self, stream: Stream) -> Result<(), DriverError> {
        unsafe { check(sys::lib().cuEventRecord(self.start, stream.raw() as sys::CUstream)) }
    }

    fn record_stop(&mut self, stream: Stream) -> Result<(), DriverError> {
        unsafe { check(sys::lib().cuEventRecord(self.stop, stream.raw() as sys::CUstream)) }
    }

    fn synchronize(&mut self) -> Result<(), DriverError> {
        unsafe { check(sys::lib().cuEventSynchronize(self.stop)) }
    }

    fn elapsed_seconds(&mut self) -> Result<f64, DriverError> {
        let mut millis = 0f32;
        unsafe {
            check(sys::lib().cuEventElapsedTime(&mut millis, self.start, self.stop))?;
        }
        Ok(millis as f64 / 1e3)
    }
}

impl Drop for CudaTimer {
    fn drop(&mut self) {
        unsafe {
            if !self.stop.is_null() {
                sys::lib().cuEventDestroy_v2(self.stop);
            }
            if !self.start.is_null() {
                sys::lib().cuEventDestroy_v2(self.start);
            }
        }
    }
}
