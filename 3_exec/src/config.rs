/// If the im2col buffer of a convolution would hold more elements than this,
/// the work is split along the batch dimension.
pub const IM2COL_NUMEL_LIMIT: usize = 511 * 1024 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CpuConfig {
    pub im2col_numel_limit: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            im2col_numel_limit: IM2COL_NUMEL_LIMIT,
        }
    }
}

impl CpuConfig {
    pub const ENV_IM2COL_LIMIT: &'static str = "INFINI_CONV_IM2COL_LIMIT";

    /// Reads overrides from the process environment, once at engine start-up.
    pub fn from_env() -> Self {
        Self::from_var(std::env::var(Self::ENV_IM2COL_LIMIT).ok().as_deref())
    }

    fn from_var(limit: Option<&str>) -> Self {
        let mut ans = Self::default();
        if let Some(limit) = limit {
            match limit.trim().parse::<usize>() {
                Ok(n) if n > 0 => ans.im2col_numel_limit = n,
                _ => log::warn!(
                    "ignoring {}={limit:?}, expected a positive integer",
                    Self::ENV_IM2COL_LIMIT
                ),
            }
        }
        ans
    }
}
