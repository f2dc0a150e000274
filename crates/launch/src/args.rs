//! Kernel argument marshalling.

/// A scalar or device-pointer argument passed to a kernel launch.
///
/// Device pointers travel as raw addresses; the memory they point at is
/// owned by the caller and must outlive the launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(u64),
}

impl KernelArg {
    pub fn ptr(address: u64) -> Self {
        KernelArg::Ptr(address)
    }
}

impl From<i32> for KernelArg {
    fn from(value: i32) -> Self {
        KernelArg::I32(value)
    }
}

impl From<u32> for KernelArg {
    fn from(value: u32) -> Self {
        KernelArg::U32(value)
    }
}

impl From<i64> for KernelArg {
    fn from(value: i64) -> Self {
        KernelArg::I64(value)
    }
}

impl From<u64> for KernelArg {
    fn from(value: u64) -> Self {
        KernelArg::U64(value)
    }
}

impl From<f32> for KernelArg {
    fn from(value: f32) -> Self {
        KernelArg::F32(value)
    }
}

impl From<f64> for KernelArg {
    fn from(value: f64) -> Self {
        KernelArg::F64(value)
    }
}
