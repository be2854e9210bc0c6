//! Functions provided by the host.

use std::sync::OnceLock;
use std::time::Instant;

use crate::value::Val;

static START: OnceLock<Instant> = OnceLock::new();

/// Pin the instant `clock` measures from. Called when a VM is created.
pub(crate) fn start() -> Instant {
    *START.get_or_init(Instant::now)
}

/// Seconds elapsed since the first VM of this process was created.
pub fn clock(_args: &[Val]) -> Val {
    Val::Number(start().elapsed().as_secs_f64())
}
