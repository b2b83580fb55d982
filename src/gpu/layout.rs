use crate::error::LayoutError;

const VEC4_BYTES: usize = 16;

/// How the host lets us back the instance buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferMode {
    /// One raw/storage buffer, addressed as a whole.
    Raw,
    /// Only small uniform windows can be bound, each at an aligned offset.
    ConstantWindows {
        max_window_bytes: usize,
        offset_alignment: usize,
    },
}

/// Window arrangement of the shared instance buffer.
///
/// Inside every window the slots are stored as three contiguous regions:
/// `max_per_window * 3` vec4 of object-to-world transforms, the same amount of
/// world-to-object transforms, then `max_per_window` colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowLayout {
    pub mode: BufferMode,
    pub max_instances: usize,
    pub instance_bytes: usize,
    pub window_bytes: usize,
    pub max_per_window: usize,
    pub window_count: usize,
}

#[inline]
fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

impl WindowLayout {
    pub fn compute(
        max_instances: usize,
        instance_bytes: usize,
        mode: BufferMode,
    ) -> Result<Self, LayoutError> {
        if max_instances == 0 {
            return Err(LayoutError::NoInstances);
        }
        if instance_bytes == 0 || instance_bytes % VEC4_BYTES != 0 {
            return Err(LayoutError::InvalidInstanceSize(instance_bytes));
        }

        let (window_bytes, max_per_window) = match mode {
            BufferMode::Raw => (align_up(max_instances * instance_bytes, VEC4_BYTES), max_instances),
            BufferMode::ConstantWindows {
                max_window_bytes,
                offset_alignment,
            } => {
                // windows start at multiples of window_bytes, so it has to honor both
                // the host offset alignment and vec4 addressing
                let alignment = offset_alignment.max(1).max(VEC4_BYTES);
                let window_bytes = max_window_bytes / alignment * alignment;
                let max_per_window = window_bytes / instance_bytes;
                if max_per_window == 0 {
                    return Err(LayoutError::InstanceTooLarge {
                        instance_bytes,
                        window_bytes: max_window_bytes,
                    });
                }
                (window_bytes, max_per_window)
            }
        };

        Ok(Self {
            mode,
            max_instances,
            instance_bytes,
            window_bytes,
            max_per_window,
            window_count: max_instances.div_ceil(max_per_window),
        })
    }

    pub fn is_windowed(&self) -> bool {
        matches!(self.mode, BufferMode::ConstantWindows { .. })
    }

    pub fn total_bytes(&self) -> usize {
        self.window_count * self.window_bytes
    }

    /// Stride between windows in vec4 units.
    pub fn window_vec4s(&self) -> usize {
        self.window_bytes / VEC4_BYTES
    }

    pub fn total_vec4s(&self) -> usize {
        self.window_count * self.window_vec4s()
    }

    // sub-region offsets relative to the window start, in vec4 units
    pub fn transform_out_offset(&self) -> usize {
        0
    }

    pub fn transform_in_offset(&self) -> usize {
        self.max_per_window * 3
    }

    pub fn color_offset(&self) -> usize {
        self.max_per_window * 3 * 2
    }

    /// (window, index inside the window) of a global slot.
    #[inline]
    pub fn locate(&self, slot: usize) -> (usize, usize) {
        (slot / self.max_per_window, slot % self.max_per_window)
    }

    /// Number of live instances that fall into `window` when `instance_count`
    /// slots are in use.
    pub fn instances_in_window(&self, window: usize, instance_count: usize) -> usize {
        instance_count
            .saturating_sub(window * self.max_per_window)
            .min(self.max_per_window)
    }
}
