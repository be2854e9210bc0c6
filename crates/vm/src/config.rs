use bitflags::bitflags;

bitflags! {
    /// Diagnostics switched on at runtime.
    pub struct DebugFlags: u8 {
        /// Log every dispatched instruction with the operand stack.
        const TRACE_EXECUTION = 0b001;
        /// Log every allocation, mark, blacken and free.
        const LOG_GC = 0b010;
        /// Collect before every allocation.
        const STRESS_GC = 0b100;
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        DebugFlags::empty()
    }
}

/// Initial GC threshold. 1MiB.
pub const INIT_GC_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum call depth
    pub frames_max: usize,
    /// Stack slots reserved per frame; the operand stack holds
    /// `frames_max * slots_per_frame` values.
    pub slots_per_frame: usize,
    /// Bytes allocated before the first collection
    pub initial_gc_threshold: usize,
    /// After a collection the next threshold is `live bytes * heap_grow_factor`
    pub heap_grow_factor: usize,
    pub debug: DebugFlags,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frames_max: 64,
            slots_per_frame: u8::MAX as usize + 1,
            initial_gc_threshold: INIT_GC_THRESHOLD,
            heap_grow_factor: 2,
            debug: DebugFlags::default(),
        }
    }
}

impl VmConfig {
    pub fn stack_max(&self) -> usize {
        self.frames_max * self.slots_per_frame
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }
}
