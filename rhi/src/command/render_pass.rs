//! Render pass encoder.

use std::sync::Arc;

use ash::vk;

use super::CommandBuffer;
use crate::backend::vulkan::conversion::{
    convert_index_type, convert_load_action, convert_store_action,
};
use crate::backend::vulkan::states::texture_state;
use crate::error::GraphicsError;
use crate::resources::{BindGroup, Buffer, PipelineLayout, QueryHeap, RenderPipeline, TextureView};
use crate::types::{
    Color, IndexType, LoadAction, MAX_COLOR_ATTACHMENTS, QueueType, ScissorRect, StoreAction,
    TextureLayout, Viewport,
};

/// A color target of a render pass.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: Arc<TextureView>,
    /// Single-sampled view the multisampled `view` is averaged into.
    pub resolve_target: Option<Arc<TextureView>>,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: Color,
}

impl ColorAttachment {
    /// Clear to black and store.
    pub fn new(view: Arc<TextureView>) -> Self {
        Self {
            view,
            resolve_target: None,
            load_action: LoadAction::Clear,
            store_action: StoreAction::Store,
            clear_color: Color::BLACK,
        }
    }

    pub fn with_load_action(mut self, action: LoadAction) -> Self {
        self.load_action = action;
        self
    }

    pub fn with_store_action(mut self, action: StoreAction) -> Self {
        self.store_action = action;
        self
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_resolve_target(mut self, view: Arc<TextureView>) -> Self {
        self.resolve_target = Some(view);
        self
    }
}

/// The depth-stencil target of a render pass.
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: Arc<TextureView>,
    pub depth_load_action: LoadAction,
    pub depth_store_action: StoreAction,
    pub clear_depth: f32,
    pub stencil_load_action: LoadAction,
    pub stencil_store_action: StoreAction,
    pub clear_stencil: u32,
    /// Bind the attachment for depth testing only.
    pub read_only: bool,
}

impl DepthStencilAttachment {
    /// Clear depth to 1.0 and stencil to 0, store depth, discard stencil.
    pub fn new(view: Arc<TextureView>) -> Self {
        Self {
            view,
            depth_load_action: LoadAction::Clear,
            depth_store_action: StoreAction::Store,
            clear_depth: 1.0,
            stencil_load_action: LoadAction::Clear,
            stencil_store_action: StoreAction::Discard,
            clear_stencil: 0,
            read_only: false,
        }
    }

    pub fn with_depth(mut self, load: LoadAction, store: StoreAction, clear: f32) -> Self {
        self.depth_load_action = load;
        self.depth_store_action = store;
        self.clear_depth = clear;
        self
    }

    pub fn with_stencil(mut self, load: LoadAction, store: StoreAction, clear: u32) -> Self {
        self.stencil_load_action = load;
        self.stencil_store_action = store;
        self.clear_stencil = clear;
        self
    }

    /// Load both aspects and keep them unchanged.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.depth_load_action = LoadAction::Load;
        self.stencil_load_action = LoadAction::Load;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

impl RenderPassDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_stencil_attachment(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    fn views(&self) -> impl Iterator<Item = &Arc<TextureView>> {
        self.color_attachments
            .iter()
            .flat_map(|color| std::iter::once(&color.view).chain(color.resolve_target.as_ref()))
            .chain(self.depth_stencil_attachment.iter().map(|depth| &depth.view))
    }
}

/// The largest area every attachment covers, clamped to the framebuffer
/// limits.
pub(crate) fn render_area(
    max_width: u32,
    max_height: u32,
    extents: impl IntoIterator<Item = (u32, u32)>,
) -> (u32, u32) {
    extents
        .into_iter()
        .fold((max_width, max_height), |(width, height), (w, h)| {
            (width.min(w), height.min(h))
        })
}

/// Convert a top-left origin viewport to a native one by flipping its
/// height.
pub(crate) fn native_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y + viewport.height,
        width: viewport.width,
        height: -viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

pub(crate) fn native_scissor(rect: &ScissorRect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.x,
            y: rect.y,
        },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

fn clear_color(color: Color) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [color.r, color.g, color.b, color.a],
        },
    }
}

/// Records draws into a set of attachments.
///
/// The pass ends when the encoder is dropped. Resource transitions cannot
/// be recorded while it is open; move resources to their draw states on the
/// [`CommandBuffer`] before beginning the pass.
pub struct RenderPass<'a> {
    cmd: &'a mut CommandBuffer,
    extent: (u32, u32),
    labeled: bool,
    layout: Option<Arc<PipelineLayout>>,
}

impl<'a> RenderPass<'a> {
    pub(super) fn begin(
        cmd: &'a mut CommandBuffer,
        descriptor: &RenderPassDescriptor,
    ) -> Result<Self, GraphicsError> {
        if cmd.queue() != QueueType::Graphics {
            return Err(GraphicsError::InvalidParameter(format!(
                "render passes need the graphics queue, not {:?}",
                cmd.queue()
            )));
        }
        let color_limit =
            MAX_COLOR_ATTACHMENTS.min(cmd.device().limits().max_color_attachments as usize);
        if descriptor.color_attachments.len() > color_limit {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} color attachments exceed the limit of {}",
                descriptor.color_attachments.len(),
                color_limit
            )));
        }
        if descriptor.color_attachments.is_empty() && descriptor.depth_stencil_attachment.is_none()
        {
            return Err(GraphicsError::InvalidParameter(
                "render pass has no attachments".to_string(),
            ));
        }
        if let Some(depth) = &descriptor.depth_stencil_attachment {
            if !depth.view.format().is_depth_stencil() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{:?} is not a depth-stencil format",
                    depth.view.format()
                )));
            }
        }

        let limits = cmd.device().limits();
        let (width, height) = render_area(
            limits.max_framebuffer_width,
            limits.max_framebuffer_height,
            descriptor.views().map(|view| (view.width(), view.height())),
        );
        let layer_count = descriptor
            .views()
            .map(|view| view.layer_count())
            .min()
            .unwrap_or(1)
            .min(limits.max_framebuffer_layers.max(1));

        for color in &descriptor.color_attachments {
            cmd.transition_texture(&color.view, TextureLayout::RenderTarget);
            if let Some(resolve) = &color.resolve_target {
                cmd.transition_texture(resolve, TextureLayout::RenderTarget);
            }
        }
        let depth_layout = descriptor.depth_stencil_attachment.as_ref().map(|depth| {
            let layout = if depth.read_only {
                TextureLayout::DepthRead
            } else {
                TextureLayout::DepthWrite
            };
            cmd.transition_texture(&depth.view, layout);
            texture_state(layout, depth.view.format().is_depth_only()).layout
        });
        cmd.flush_barriers();

        let color_infos: Vec<vk::RenderingAttachmentInfo> = descriptor
            .color_attachments
            .iter()
            .map(|color| {
                let mut info = vk::RenderingAttachmentInfo::default()
                    .image_view(color.view.handle())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(convert_load_action(color.load_action))
                    .store_op(convert_store_action(color.store_action))
                    .clear_value(clear_color(color.clear_color));
                if let Some(resolve) = &color.resolve_target {
                    info = info
                        .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                        .resolve_image_view(resolve.handle())
                        .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                }
                info
            })
            .collect();

        let depth_info = descriptor
            .depth_stencil_attachment
            .as_ref()
            .zip(depth_layout)
            .map(|(depth, layout)| {
                let clear = vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: depth.clear_depth,
                        stencil: depth.clear_stencil,
                    },
                };
                let depth_store = if depth.read_only {
                    StoreAction::Store
                } else {
                    depth.depth_store_action
                };
                let depth_attachment = vk::RenderingAttachmentInfo::default()
                    .image_view(depth.view.handle())
                    .image_layout(layout)
                    .load_op(convert_load_action(depth.depth_load_action))
                    .store_op(convert_store_action(depth_store))
                    .clear_value(clear);
                let stencil_attachment = depth.view.format().has_stencil().then(|| {
                    vk::RenderingAttachmentInfo::default()
                        .image_view(depth.view.handle())
                        .image_layout(layout)
                        .load_op(convert_load_action(depth.stencil_load_action))
                        .store_op(convert_store_action(depth.stencil_store_action))
                        .clear_value(clear)
                });
                (
                    depth.view.format().has_depth().then_some(depth_attachment),
                    stencil_attachment,
                )
            });

        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width, height },
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(layer_count)
            .color_attachments(&color_infos);
        if let Some((depth, stencil)) = &depth_info {
            if let Some(depth) = depth {
                rendering_info = rendering_info.depth_attachment(depth);
            }
            if let Some(stencil) = stencil {
                rendering_info = rendering_info.stencil_attachment(stencil);
            }
        }

        let labeled = descriptor.label.is_some();
        {
            let (device, recorder) = cmd.parts();
            let handle = recorder.handle();
            if let Some(label) = &descriptor.label {
                device.debug_names().begin_label(handle, label);
            }
            unsafe {
                device.dispatch().cmd_begin_rendering(handle, &rendering_info);
                device.raw().cmd_set_viewport(
                    handle,
                    0,
                    &[native_viewport(&Viewport::from_dimensions(width, height))],
                );
                device.raw().cmd_set_scissor(handle, 0, &[area]);
            }
            for view in descriptor.views() {
                recorder.retain(view);
            }
            recorder.bind_state.reset();
        }

        Ok(Self {
            cmd,
            extent: (width, height),
            labeled,
            layout: None,
        })
    }

    /// Width and height of the render area.
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn set_pipeline(&mut self, pipeline: &Arc<RenderPipeline>) {
        if !pipeline.is_valid() {
            log::error!("Skipping invalid render pipeline {:?}", pipeline.label());
            return;
        }
        self.cmd.bind_pipeline(
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.handle(),
            pipeline.layout(),
        );
        self.cmd.parts().1.retain(pipeline);
        self.layout = Some(Arc::clone(pipeline.layout()));
    }

    /// Bind `group` at `index`. The bind call is issued before the next draw.
    pub fn set_bind_group(
        &mut self,
        index: u32,
        group: &Arc<BindGroup>,
        dynamic_offsets: &[u32],
    ) {
        self.cmd.set_bind_group(index, group, dynamic_offsets);
    }

    /// Write `data` into push constant range `range_index` of the bound
    /// pipeline's layout.
    pub fn set_push_constants(
        &mut self,
        range_index: usize,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let layout = self.layout.clone().ok_or_else(|| {
            GraphicsError::InvalidParameter("push constants set before a pipeline".to_string())
        })?;
        self.cmd.push_constants(&layout, range_index, data)
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.set_viewports(std::slice::from_ref(viewport));
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        let max = (self.cmd.device().limits().max_viewports as usize)
            .min(crate::types::MAX_VIEWPORTS_AND_SCISSORS);
        if viewports.is_empty() || viewports.len() > max {
            log::error!("{} viewports set, limit is {}", viewports.len(), max);
            return;
        }
        let native: Vec<vk::Viewport> = viewports.iter().map(native_viewport).collect();
        let (device, recorder) = self.cmd.parts();
        unsafe { device.raw().cmd_set_viewport(recorder.handle(), 0, &native) };
    }

    pub fn set_scissor_rect(&mut self, rect: &ScissorRect) {
        let (device, recorder) = self.cmd.parts();
        unsafe {
            device
                .raw()
                .cmd_set_scissor(recorder.handle(), 0, &[native_scissor(rect)]);
        }
    }

    pub fn set_stencil_reference(&mut self, reference: u32) {
        let (device, recorder) = self.cmd.parts();
        unsafe {
            device.raw().cmd_set_stencil_reference(
                recorder.handle(),
                vk::StencilFaceFlags::FRONT_AND_BACK,
                reference,
            );
        }
    }

    pub fn set_blend_color(&mut self, color: Color) {
        let (device, recorder) = self.cmd.parts();
        unsafe {
            device
                .raw()
                .cmd_set_blend_constants(recorder.handle(), &[color.r, color.g, color.b, color.a]);
        }
    }

    /// Ignored when the device has no depth bounds test.
    pub fn set_depth_bounds(&mut self, min: f32, max: f32) {
        if !self.cmd.device().features().depth_bounds {
            log::warn!("Depth bounds test is not supported");
            return;
        }
        let (device, recorder) = self.cmd.parts();
        unsafe { device.raw().cmd_set_depth_bounds(recorder.handle(), min, max) };
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &Arc<Buffer>, offset: u64) {
        let (device, recorder) = self.cmd.parts();
        unsafe {
            device.raw().cmd_bind_vertex_buffers(
                recorder.handle(),
                slot,
                &[buffer.handle()],
                &[offset],
            );
        }
        recorder.retain(buffer);
    }

    pub fn set_index_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64, index_type: IndexType) {
        let (device, recorder) = self.cmd.parts();
        unsafe {
            device.raw().cmd_bind_index_buffer(
                recorder.handle(),
                buffer.handle(),
                offset,
                convert_index_type(index_type),
            );
        }
        recorder.retain(buffer);
    }

    /// Flush pending bind groups. Returns the native command buffer when a
    /// draw can be recorded.
    fn prepare_draw(&mut self) -> Option<vk::CommandBuffer> {
        if !self.cmd.flush_bind_groups(vk::PipelineBindPoint::GRAPHICS) {
            return None;
        }
        Some(self.cmd.parts().1.handle())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            self.cmd.device().raw().cmd_draw(
                handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            self.cmd.device().raw().cmd_draw_indexed(
                handle,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            );
        }
    }

    /// Draw with [`DrawIndirectArgs`](crate::types::DrawIndirectArgs) read
    /// from `buffer`.
    pub fn draw_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            self.cmd
                .device()
                .raw()
                .cmd_draw_indirect(handle, buffer.handle(), offset, draw_count, stride);
        }
        self.cmd.parts().1.retain(buffer);
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            self.cmd.device().raw().cmd_draw_indexed_indirect(
                handle,
                buffer.handle(),
                offset,
                draw_count,
                stride,
            );
        }
        self.cmd.parts().1.retain(buffer);
    }

    fn supports_indirect_count(&self) -> bool {
        if self.cmd.device().features().draw_indirect_count {
            return true;
        }
        log::error!("Indirect count draws are not supported");
        false
    }

    /// Draw with up to `max_draw_count` argument records, the actual count
    /// read from `count_buffer`.
    pub fn draw_indirect_count(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        count_buffer: &Arc<Buffer>,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        if !self.supports_indirect_count() {
            return;
        }
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            self.cmd.device().raw().cmd_draw_indirect_count(
                handle,
                buffer.handle(),
                offset,
                count_buffer.handle(),
                count_offset,
                max_draw_count,
                stride,
            );
        }
        let recorder = self.cmd.parts().1;
        recorder.retain(buffer);
        recorder.retain(count_buffer);
    }

    pub fn draw_indexed_indirect_count(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        count_buffer: &Arc<Buffer>,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        if !self.supports_indirect_count() {
            return;
        }
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            self.cmd.device().raw().cmd_draw_indexed_indirect_count(
                handle,
                buffer.handle(),
                offset,
                count_buffer.handle(),
                count_offset,
                max_draw_count,
                stride,
            );
        }
        let recorder = self.cmd.parts().1;
        recorder.retain(buffer);
        recorder.retain(count_buffer);
    }

    fn mesh_loader(&self) -> Option<ash::ext::mesh_shader::Device> {
        let loader = self.cmd.device().loaders().mesh_shader.clone();
        if loader.is_none() {
            log::error!("Mesh shaders are not supported");
        }
        loader
    }

    pub fn draw_mesh_tasks(&mut self, x: u32, y: u32, z: u32) {
        let Some(loader) = self.mesh_loader() else {
            return;
        };
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe { loader.cmd_draw_mesh_tasks(handle, x, y, z) };
    }

    pub fn draw_mesh_tasks_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        let Some(loader) = self.mesh_loader() else {
            return;
        };
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            loader.cmd_draw_mesh_tasks_indirect(handle, buffer.handle(), offset, draw_count, stride)
        };
        self.cmd.parts().1.retain(buffer);
    }

    pub fn draw_mesh_tasks_indirect_count(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        count_buffer: &Arc<Buffer>,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        if !self.supports_indirect_count() {
            return;
        }
        let Some(loader) = self.mesh_loader() else {
            return;
        };
        let Some(handle) = self.prepare_draw() else {
            return;
        };
        unsafe {
            loader.cmd_draw_mesh_tasks_indirect_count(
                handle,
                buffer.handle(),
                offset,
                count_buffer.handle(),
                count_offset,
                max_draw_count,
                stride,
            );
        }
        let recorder = self.cmd.parts().1;
        recorder.retain(buffer);
        recorder.retain(count_buffer);
    }

    pub fn begin_query(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        self.cmd.begin_query(heap, index);
    }

    pub fn end_query(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        self.cmd.end_query(heap, index);
    }

    pub fn write_timestamp(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        self.cmd.write_timestamp(heap, index);
    }

    pub fn push_debug_group(&mut self, label: &str) {
        self.cmd.push_debug_group(label);
    }

    pub fn pop_debug_group(&mut self) {
        self.cmd.pop_debug_group();
    }

    pub fn insert_debug_marker(&mut self, label: &str) {
        self.cmd.insert_debug_marker(label);
    }
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        let labeled = self.labeled;
        let (device, recorder) = self.cmd.parts();
        let handle = recorder.handle();
        unsafe { device.dispatch().cmd_end_rendering(handle) };
        if labeled {
            device.debug_names().end_label(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::single_target(vec![(1920, 1080)], (1920, 1080))]
    #[case::smallest_wins(vec![(1920, 1080), (960, 1200)], (960, 1080))]
    #[case::clamped_by_limits(vec![(20000, 20000)], (16384, 16384))]
    #[case::no_views(vec![], (16384, 16384))]
    fn test_render_area(#[case] extents: Vec<(u32, u32)>, #[case] expected: (u32, u32)) {
        assert_eq!(render_area(16384, 16384, extents), expected);
    }

    #[test]
    fn test_viewport_is_flipped() {
        let viewport = native_viewport(&Viewport::new(10.0, 20.0, 640.0, 480.0));
        assert_eq!(viewport.x, 10.0);
        assert_eq!(viewport.y, 500.0);
        assert_eq!(viewport.width, 640.0);
        assert_eq!(viewport.height, -480.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_scissor_conversion() {
        let rect = native_scissor(&ScissorRect::new(-4, 8, 100, 50));
        assert_eq!(rect.offset.x, -4);
        assert_eq!(rect.offset.y, 8);
        assert_eq!(rect.extent.width, 100);
        assert_eq!(rect.extent.height, 50);
    }
}
