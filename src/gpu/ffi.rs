use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Vec4};

use crate::config::INSTANCE_BYTES;

/// One instance slot as it is scattered into the shared buffer. The three
/// parts land in separate sub-regions of a window, not interleaved.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    // 3x4 matrices packed column after column into three vec4
    pub object_to_world: [Vec4; 3],
    pub world_to_object: [Vec4; 3],
    pub color: Vec4,
}

const _: () = assert!(std::mem::size_of::<InstanceData>() == INSTANCE_BYTES);

impl InstanceData {
    pub fn new(transform: &Affine3A, color: Vec4) -> Self {
        Self {
            object_to_world: pack_affine(transform),
            world_to_object: pack_affine(&transform.inverse()),
            color,
        }
    }
}

/// Packs the 12 meaningful floats of an affine transform (x, y, z axes then
/// translation) into three vec4.
pub fn pack_affine(a: &Affine3A) -> [Vec4; 3] {
    let x = a.matrix3.x_axis;
    let y = a.matrix3.y_axis;
    let z = a.matrix3.z_axis;
    let t = a.translation;
    [
        Vec4::new(x.x, x.y, x.z, y.x),
        Vec4::new(y.y, y.z, z.x, z.y),
        Vec4::new(z.z, t.x, t.y, t.z),
    ]
}
