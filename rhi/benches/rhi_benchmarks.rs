use ash::vk;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_rhi::backend::vulkan::barriers::{BarrierBatch, MAX_BARRIER_COUNT};
use redlilium_rhi::backend::vulkan::queue_family::{QueueFamilyCaps, select_queue_families};
use redlilium_rhi::backend::vulkan::states::{SubresourceLayouts, buffer_state, texture_state};
use redlilium_rhi::{BufferStates, TextureLayout};

// ---------------------------------------------------------------------------
// State tables
// ---------------------------------------------------------------------------

fn bench_buffer_state_folding(c: &mut Criterion) {
    let read_states = BufferStates::VERTEX_BUFFER
        | BufferStates::INDEX_BUFFER
        | BufferStates::CONSTANT_BUFFER
        | BufferStates::SHADER_RESOURCE
        | BufferStates::INDIRECT_ARGUMENT;
    c.bench_function("buffer_state_fold_single", |b| {
        b.iter(|| buffer_state(black_box(BufferStates::UNORDERED_ACCESS)));
    });
    c.bench_function("buffer_state_fold_combined_reads", |b| {
        b.iter(|| buffer_state(black_box(read_states)));
    });
}

fn bench_texture_state_lookup(c: &mut Criterion) {
    let layouts = [
        TextureLayout::RenderTarget,
        TextureLayout::DepthWrite,
        TextureLayout::ShaderResource,
        TextureLayout::UnorderedAccess,
        TextureLayout::CopyDest,
        TextureLayout::Present,
    ];
    c.bench_function("texture_state_all_layouts", |b| {
        b.iter(|| {
            for layout in layouts {
                black_box(texture_state(black_box(layout), false));
            }
        });
    });
}

fn bench_subresource_tracking(c: &mut Criterion) {
    c.bench_function("subresource_uniform_check_12_mips_6_layers", |b| {
        let layouts = SubresourceLayouts::new(12, 6, TextureLayout::ShaderResource);
        b.iter(|| black_box(layouts.uniform_layout(0, 12, 0, 6)));
    });
    c.bench_function("subresource_per_mip_transitions", |b| {
        b.iter_with_setup(
            || SubresourceLayouts::new(12, 1, TextureLayout::ShaderResource),
            |mut layouts| {
                for mip in 0..12 {
                    layouts.set_range(mip, 1, 0, 1, TextureLayout::RenderTarget);
                    layouts.set_range(mip, 1, 0, 1, TextureLayout::ShaderResource);
                }
                black_box(layouts);
            },
        );
    });
}

// ---------------------------------------------------------------------------
// Barrier batching
// ---------------------------------------------------------------------------

fn bench_barrier_batching(c: &mut Criterion) {
    let range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    c.bench_function("barrier_batch_fill_buffers", |b| {
        let mut batch = BarrierBatch::new();
        b.iter(|| {
            for _ in 0..MAX_BARRIER_COUNT {
                batch.add_buffer_barrier(
                    vk::Buffer::null(),
                    BufferStates::COPY_DEST,
                    BufferStates::SHADER_RESOURCE,
                );
            }
            black_box(batch.len());
            batch.clear();
        });
    });

    c.bench_function("barrier_batch_fill_images", |b| {
        let mut batch = BarrierBatch::new();
        b.iter(|| {
            for _ in 0..MAX_BARRIER_COUNT {
                batch.add_image_barrier(
                    vk::Image::null(),
                    range,
                    false,
                    TextureLayout::RenderTarget,
                    TextureLayout::ShaderResource,
                );
            }
            black_box(batch.len());
            batch.clear();
        });
    });

    c.bench_function("barrier_batch_skip_redundant", |b| {
        let mut batch = BarrierBatch::new();
        b.iter(|| {
            for _ in 0..64 {
                black_box(batch.add_buffer_barrier(
                    vk::Buffer::null(),
                    BufferStates::SHADER_RESOURCE,
                    BufferStates::SHADER_RESOURCE,
                ));
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Queue selection
// ---------------------------------------------------------------------------

fn bench_queue_selection(c: &mut Criterion) {
    let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
    let unified = [QueueFamilyCaps::new(all, 1)];
    let discrete = [
        QueueFamilyCaps::new(all, 16),
        QueueFamilyCaps::new(vk::QueueFlags::TRANSFER, 2),
        QueueFamilyCaps::new(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
        QueueFamilyCaps {
            video_codecs: vk::VideoCodecOperationFlagsKHR::DECODE_H264,
            ..QueueFamilyCaps::new(vk::QueueFlags::VIDEO_DECODE_KHR, 1)
        },
    ];

    c.bench_function("queue_selection_single_family", |b| {
        b.iter(|| select_queue_families(black_box(&unified), false));
    });
    c.bench_function("queue_selection_discrete_gpu", |b| {
        b.iter(|| select_queue_families(black_box(&discrete), true));
    });
}

criterion_group!(
    benches,
    bench_buffer_state_folding,
    bench_texture_state_lookup,
    bench_subresource_tracking,
    bench_barrier_batching,
    bench_queue_selection,
);
criterion_main!(benches);
