use bevy_debris_field::config::INSTANCE_BYTES;
use bevy_debris_field::error::{HostError, InstanceBufferError};
use bevy_debris_field::gpu::backend::{GpuBufferId, MemoryBackend, WriteRecord};
use bevy_debris_field::gpu::buffers::{InstanceBufferManager, MirrorSpans, slot_jobs};
use bevy_debris_field::gpu::ffi::InstanceData;
use glam::{Affine3A, Vec3, Vec4};

fn record(byte_offset: usize, len: usize) -> WriteRecord {
    WriteRecord {
        buffer: GpuBufferId(0),
        byte_offset,
        len,
    }
}

fn numbered_instances(n: usize) -> Vec<InstanceData> {
    (0..n)
        .map(|i| {
            let transform = Affine3A::from_translation(Vec3::new(i as f32, 0.0, 0.0));
            InstanceData::new(&transform, Vec4::new(i as f32, 1.0, 0.0, 1.0))
        })
        .collect()
}

#[test]
fn windowed_upload_sends_full_windows_then_tail_regions() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, false).unwrap();

    buffers.upload_gpu_data(700).unwrap();
    // 585 per window: one full window, then 115 slots in the second one
    let window = 65536;
    assert_eq!(
        buffers.backend().writes,
        vec![
            record(0, window),
            record(window, 115 * 48),
            record(window + 585 * 48, 115 * 48),
            record(window + 585 * 96, 115 * 16),
        ]
    );
}

#[test]
fn upload_of_exactly_full_windows_has_no_tail() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, false).unwrap();

    buffers.upload_gpu_data(585).unwrap();
    assert_eq!(buffers.backend().writes, vec![record(0, 65536)]);

    buffers.backend_mut().clear_writes();
    buffers.upload_gpu_data(0).unwrap();
    assert!(buffers.backend().writes.is_empty());
}

#[test]
fn raw_upload_only_touches_live_prefix_of_each_region() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::raw());
    buffers.init(100, INSTANCE_BYTES, true).unwrap();

    buffers.upload_gpu_data(40).unwrap();
    assert_eq!(
        buffers.backend().writes,
        vec![
            record(0, 40 * 48),
            record(100 * 48, 40 * 48),
            record(100 * 96, 40 * 16)
        ]
    );
}

#[test]
fn too_many_instances_is_rejected_without_writing() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::raw());
    buffers.init(100, INSTANCE_BYTES, false).unwrap();

    let err = buffers.upload_gpu_data(101).unwrap_err();
    assert_eq!(
        err,
        InstanceBufferError::TooManyInstances {
            requested: 101,
            max: 100
        }
    );
    assert!(buffers.backend().writes.is_empty());
}

#[test]
fn scattered_instances_reach_the_gpu_copy() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, false).unwrap();

    let instances = numbered_instances(700);
    {
        let mut sysmem = buffers.sysmem_buffer_mut().unwrap();
        assert_eq!(sysmem.window_stride(), 65536 / 16);
        sysmem.write_instances(0, &instances);
        assert_eq!(sysmem.read_slot(699), instances[699]);
        assert_eq!(sysmem.read_slot(3), instances[3]);
    }
    buffers.upload_gpu_data(700).unwrap();

    let gpu = buffers.backend().buffer(GpuBufferId(0)).unwrap();
    // slot 699 is slot 114 of window 1
    let color_at = 65536 + 585 * 96 + 114 * 16;
    let color: [f32; 4] = bytemuck::pod_read_unaligned(&gpu[color_at..color_at + 16]);
    assert_eq!(color, [699.0, 1.0, 0.0, 1.0]);

    // nothing past the live tail was uploaded
    let unused_color = 65536 + 585 * 96 + 115 * 16;
    assert!(gpu[unused_color..unused_color + 16].iter().all(|b| *b == 0));
}

#[test]
fn writes_past_capacity_are_dropped() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::raw());
    buffers.init(10, INSTANCE_BYTES, false).unwrap();

    let instances = numbered_instances(5);
    let mut sysmem = buffers.sysmem_buffer_mut().unwrap();
    sysmem.write_instances(8, &instances);
    assert_eq!(sysmem.read_slot(8), instances[0]);
    assert_eq!(sysmem.read_slot(9), instances[1]);
}

#[test]
fn failed_registration_releases_everything() {
    let mut backend = MemoryBackend::constant_windows();
    backend.batch_limit = Some(1);
    let mut buffers = InstanceBufferManager::new(backend);

    let err = buffers.init(1000, INSTANCE_BYTES, false).unwrap_err();
    assert!(matches!(
        err,
        InstanceBufferError::Host(HostError::BatchRegistration { window: 1, .. })
    ));
    assert!(!buffers.is_initialized());
    assert_eq!(buffers.backend().live_batches(), 0);
    assert_eq!(buffers.backend().live_buffers(), 0);
}

#[test]
fn shutdown_is_idempotent() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, false).unwrap();
    assert_eq!(buffers.backend().live_batches(), 2);

    buffers.shutdown();
    buffers.shutdown();
    assert_eq!(buffers.backend().live_batches(), 0);
    assert_eq!(buffers.backend().live_buffers(), 0);
    assert_eq!(
        buffers.upload_gpu_data(1),
        Err(InstanceBufferError::NotInitialized)
    );
    assert!(buffers.sysmem().is_none());
}

#[test]
fn init_twice_is_an_error() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::raw());
    buffers.init(10, INSTANCE_BYTES, false).unwrap();
    assert_eq!(
        buffers.init(10, INSTANCE_BYTES, false),
        Err(InstanceBufferError::AlreadyInitialized)
    );
}

#[test]
fn one_draw_batch_per_populated_window() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, true).unwrap();

    let list = buffers.draw_batches(700);
    assert_eq!(list.batches.len(), 2);
    assert_eq!(list.batches[0].instance_count, 585);
    assert_eq!(list.batches[1].instance_count, 115);
    assert_eq!(list.batches[1].batch, buffers.batch_ids()[1]);
    assert!(list.batches.iter().all(|b| b.casts_shadows && b.visible_offset == 0));
    assert_eq!(list.visible_instances.len(), 585);
    assert!(list.visible_instances.iter().enumerate().all(|(i, v)| *v as usize == i));
    assert_eq!(list.total_instances(), 700);
    assert!(list.bounds.extents.x.is_infinite());

    let empty = buffers.draw_batches(0);
    assert!(empty.batches.is_empty());
    assert!(empty.visible_instances.is_empty());
}

#[test]
fn batch_metadata_describes_the_three_regions() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, false).unwrap();

    let second = buffers.backend().batch(buffers.batch_ids()[1]).unwrap();
    assert_eq!(second.window_offset, 65536);
    assert_eq!(second.object_to_world_offset, 0);
    assert_eq!(second.world_to_object_offset, 585 * 48);
    assert_eq!(second.color_offset, 585 * 96);
}

#[test]
fn mirror_spans_split_at_windows_and_slots() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::constant_windows());
    buffers.init(1000, INSTANCE_BYTES, false).unwrap();

    let spans = buffers.sysmem_buffer_mut().unwrap().into_spans();
    let lens: Vec<usize> = spans.spans().iter().map(|s| s.len()).collect();
    assert_eq!(lens, vec![585, 415]);

    let (head, tail) = spans.split_at_slot(600);
    assert_eq!(head.slot_count(), 600);
    assert_eq!(tail.first_slot(), Some(600));
    let chunks: Vec<(usize, usize)> = tail
        .chunked(256)
        .iter()
        .map(|s| (s.first_slot(), s.len()))
        .collect();
    assert_eq!(chunks, vec![(600, 256), (856, 144)]);
}

#[test]
fn slot_jobs_pair_items_with_their_slots() {
    let mut buffers = InstanceBufferManager::new(MemoryBackend::raw());
    buffers.init(6, INSTANCE_BYTES, false).unwrap();

    let mut items: Vec<u32> = (0..10).collect();
    let jobs = slot_jobs(&mut items, buffers.sysmem_buffer_mut().unwrap().into_spans(), 4);
    let shape: Vec<(usize, usize, Option<usize>)> = jobs
        .iter()
        .map(|job| (job.first, job.items.len(), job.span.as_ref().map(|s| s.first_slot())))
        .collect();
    // six items have slots, the last four run without one
    assert_eq!(
        shape,
        vec![(0, 4, Some(0)), (4, 2, Some(4)), (6, 4, None)]
    );

    let empty = slot_jobs(&mut items, MirrorSpans::default(), 3);
    assert_eq!(empty.len(), 4);
    assert!(empty.iter().all(|job| job.span.is_none()));
}
