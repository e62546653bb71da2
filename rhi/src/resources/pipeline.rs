//! Render and compute pipelines.
//!
//! Render pipelines target dynamic rendering, so attachment formats are part
//! of the descriptor instead of a render pass object. Viewport, scissor,
//! stencil reference and blend constants are always dynamic; depth bounds
//! and the fragment shading rate become dynamic when the adapter supports
//! them.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::conversion::{
    convert_blend_factor, convert_blend_operation, convert_color_write_mask,
    convert_compare_function, convert_cull_mode, convert_fill_mode, convert_front_face,
    convert_primitive_topology, convert_sample_count, convert_shader_stage,
    convert_stencil_operation, convert_step_mode, convert_vertex_format,
};
use crate::backend::vulkan::deferred::DeferredResource;
use crate::backend::vulkan::features::AdapterFeatures;
use crate::device::GraphicsDevice;
use crate::resources::{PipelineLayout, ShaderModule};
use crate::types::{
    BlendState, DepthClipMode, DepthStencilState, FillMode, MAX_COLOR_ATTACHMENTS, PixelFormat,
    PrimitiveTopology, RasterizerState, ShaderStage, StencilFaceState, TextureSampleCount,
    VertexBufferLayout,
};

/// Descriptor for creating a render pipeline.
///
/// Either a vertex shader or a mesh shader (optionally preceded by an
/// amplification shader) must be set.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub layout: Arc<PipelineLayout>,
    pub vertex_shader: Option<Arc<ShaderModule>>,
    pub amplification_shader: Option<Arc<ShaderModule>>,
    pub mesh_shader: Option<Arc<ShaderModule>>,
    pub fragment_shader: Option<Arc<ShaderModule>>,
    /// Vertex buffer slot `i` is `vertex_buffers[i]`.
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub primitive_topology: PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub blend: BlendState,
    pub sample_count: TextureSampleCount,
    pub color_formats: Vec<PixelFormat>,
    /// [`PixelFormat::Undefined`] when there is no depth-stencil attachment.
    pub depth_stencil_format: PixelFormat,
}

impl RenderPipelineDescriptor {
    pub fn new(layout: Arc<PipelineLayout>) -> Self {
        Self {
            label: None,
            layout,
            vertex_shader: None,
            amplification_shader: None,
            mesh_shader: None,
            fragment_shader: None,
            vertex_buffers: Vec::new(),
            primitive_topology: PrimitiveTopology::default(),
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::DEPTH_NONE,
            blend: BlendState::default(),
            sample_count: TextureSampleCount::default(),
            color_formats: Vec::new(),
            depth_stencil_format: PixelFormat::Undefined,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_vertex_shader(mut self, shader: Arc<ShaderModule>) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    pub fn with_amplification_shader(mut self, shader: Arc<ShaderModule>) -> Self {
        self.amplification_shader = Some(shader);
        self
    }

    pub fn with_mesh_shader(mut self, shader: Arc<ShaderModule>) -> Self {
        self.mesh_shader = Some(shader);
        self
    }

    pub fn with_fragment_shader(mut self, shader: Arc<ShaderModule>) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn with_vertex_buffer(mut self, layout: VertexBufferLayout) -> Self {
        self.vertex_buffers.push(layout);
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.primitive_topology = topology;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_depth_stencil(mut self, format: PixelFormat, state: DepthStencilState) -> Self {
        self.depth_stencil_format = format;
        self.depth_stencil = state;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_sample_count(mut self, sample_count: TextureSampleCount) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_color_format(mut self, format: PixelFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    /// Shader stages in pipeline order.
    fn stages(&self) -> Vec<(ShaderStage, &Arc<ShaderModule>)> {
        [
            (ShaderStage::Vertex, &self.vertex_shader),
            (ShaderStage::Amplification, &self.amplification_shader),
            (ShaderStage::Mesh, &self.mesh_shader),
            (ShaderStage::Fragment, &self.fragment_shader),
        ]
        .into_iter()
        .filter_map(|(stage, module)| module.as_ref().map(|m| (stage, m)))
        .collect()
    }
}

/// Descriptor for creating a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub layout: Arc<PipelineLayout>,
    pub shader: Arc<ShaderModule>,
}

impl ComputePipelineDescriptor {
    pub fn new(layout: Arc<PipelineLayout>, shader: Arc<ShaderModule>) -> Self {
        Self {
            label: None,
            layout,
            shader,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Check the shader combination of a render pipeline.
pub(crate) fn validate_render_stages(
    vertex: bool,
    amplification: bool,
    mesh: bool,
    features: &AdapterFeatures,
) -> Result<(), String> {
    match (vertex, mesh) {
        (true, true) => Err("vertex and mesh shaders are mutually exclusive".to_string()),
        (false, false) => Err("a vertex or mesh shader is required".to_string()),
        (true, false) if amplification => {
            Err("amplification shaders require a mesh shader".to_string())
        }
        (false, true) if !features.mesh_shader => Err("mesh shaders are not supported".to_string()),
        (false, true) if amplification && !features.task_shader => {
            Err("amplification shaders are not supported".to_string())
        }
        _ => Ok(()),
    }
}

/// Native vertex bindings and attributes. Layouts with a zero stride are
/// skipped but keep their slot index.
pub(crate) fn vertex_input(
    layouts: &[VertexBufferLayout],
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let mut bindings = Vec::new();
    let mut attributes = Vec::new();
    for (slot, layout) in layouts.iter().enumerate() {
        if layout.stride == 0 {
            continue;
        }
        let binding = slot as u32;
        bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride: layout.stride,
            input_rate: convert_step_mode(layout.step_mode),
        });
        attributes.extend(layout.attributes.iter().map(|attribute| {
            vk::VertexInputAttributeDescription {
                location: attribute.shader_location,
                binding,
                format: convert_vertex_format(attribute.format),
                offset: attribute.offset,
            }
        }));
    }
    (bindings, attributes)
}

/// Per-attachment blend state for `count` color attachments.
pub(crate) fn color_blend_attachments(
    blend: &BlendState,
    count: usize,
    independent_blend: bool,
) -> Vec<vk::PipelineColorBlendAttachmentState> {
    (0..count.min(MAX_COLOR_ATTACHMENTS))
        .map(|index| {
            let state = if independent_blend {
                blend.attachment(index)
            } else {
                &blend.render_targets[0]
            };
            vk::PipelineColorBlendAttachmentState {
                blend_enable: state.blend_enabled().into(),
                src_color_blend_factor: convert_blend_factor(state.src_color),
                dst_color_blend_factor: convert_blend_factor(state.dst_color),
                color_blend_op: convert_blend_operation(state.color_op),
                src_alpha_blend_factor: convert_blend_factor(state.src_alpha),
                dst_alpha_blend_factor: convert_blend_factor(state.dst_alpha),
                alpha_blend_op: convert_blend_operation(state.alpha_op),
                color_write_mask: convert_color_write_mask(state.write_mask),
            }
        })
        .collect()
}

fn stencil_op_state(face: &StencilFaceState, state: &DepthStencilState) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: convert_stencil_operation(face.fail_op),
        pass_op: convert_stencil_operation(face.pass_op),
        depth_fail_op: convert_stencil_operation(face.depth_fail_op),
        compare_op: convert_compare_function(face.compare),
        compare_mask: state.stencil_read_mask as u32,
        write_mask: state.stencil_write_mask as u32,
        reference: 0,
    }
}

fn log_unsupported(label: &Option<String>, what: &str) {
    log::warn!("Render pipeline {:?}: {} is not supported, ignoring", label, what);
}

/// Graphics pipeline.
pub struct RenderPipeline {
    device: Arc<GraphicsDevice>,
    label: Option<String>,
    layout: Arc<PipelineLayout>,
    handle: vk::Pipeline,
}

impl RenderPipeline {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &RenderPipelineDescriptor,
    ) -> Arc<Self> {
        let handle = match Self::create_handle(device, descriptor) {
            Ok(handle) => {
                if let Some(label) = &descriptor.label {
                    device.debug_names().set_object_name(handle, label);
                }
                log::trace!("Created render pipeline {:?}", descriptor.label);
                handle
            }
            Err(message) => {
                log::error!(
                    "Failed to create render pipeline {:?}: {}",
                    descriptor.label,
                    message
                );
                vk::Pipeline::null()
            }
        };
        Arc::new(Self {
            device: Arc::clone(device),
            label: descriptor.label.clone(),
            layout: Arc::clone(&descriptor.layout),
            handle,
        })
    }

    fn create_handle(
        device: &GraphicsDevice,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<vk::Pipeline, String> {
        let features = device.features();
        let label = &descriptor.label;

        if !descriptor.layout.is_valid() {
            return Err("pipeline layout is invalid".to_string());
        }
        validate_render_stages(
            descriptor.vertex_shader.is_some(),
            descriptor.amplification_shader.is_some(),
            descriptor.mesh_shader.is_some(),
            features,
        )?;
        if descriptor.color_formats.len() > MAX_COLOR_ATTACHMENTS {
            return Err(format!(
                "{} color attachments exceed the maximum of {}",
                descriptor.color_formats.len(),
                MAX_COLOR_ATTACHMENTS
            ));
        }

        let stages = descriptor.stages();
        if let Some((stage, _)) = stages.iter().find(|(_, module)| !module.is_valid()) {
            return Err(format!("{:?} shader module is invalid", stage));
        }
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages
            .iter()
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(convert_shader_stage(*stage))
                    .module(module.handle())
                    .name(module.entry_point())
            })
            .collect();

        let (vertex_bindings, vertex_attributes) = vertex_input(&descriptor.vertex_buffers);
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_primitive_topology(descriptor.primitive_topology))
            .primitive_restart_enable(descriptor.primitive_topology.is_strip());

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = &descriptor.rasterizer;
        if rasterizer.fill_mode == FillMode::Wireframe && !features.fill_mode_non_solid {
            log_unsupported(label, "wireframe fill");
        }
        let depth_clamp = rasterizer.depth_clip_mode == DepthClipMode::Clamp;
        if depth_clamp && !features.depth_clamp {
            log_unsupported(label, "depth clamp");
        }
        let mut rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(depth_clamp && features.depth_clamp)
            .polygon_mode(convert_fill_mode(
                rasterizer.fill_mode,
                features.fill_mode_non_solid,
            ))
            .cull_mode(convert_cull_mode(rasterizer.cull_mode))
            .front_face(convert_front_face(rasterizer.front_face))
            .depth_bias_enable(rasterizer.depth_bias_enabled())
            .depth_bias_constant_factor(rasterizer.depth_bias)
            .depth_bias_slope_factor(rasterizer.depth_bias_slope_scale)
            .depth_bias_clamp(if features.depth_bias_clamp {
                rasterizer.depth_bias_clamp
            } else {
                0.0
            })
            .line_width(1.0);
        let mut depth_clip = vk::PipelineRasterizationDepthClipStateCreateInfoEXT::default()
            .depth_clip_enable(!depth_clamp);
        if features.depth_clip_enable {
            rasterization = rasterization.push_next(&mut depth_clip);
        }
        let mut conservative = vk::PipelineRasterizationConservativeStateCreateInfoEXT::default()
            .conservative_rasterization_mode(vk::ConservativeRasterizationModeEXT::OVERESTIMATE);
        if rasterizer.conservative_raster {
            if features.conservative_rasterization {
                rasterization = rasterization.push_next(&mut conservative);
            } else {
                log_unsupported(label, "conservative rasterization");
            }
        }

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(convert_sample_count(descriptor.sample_count))
            .alpha_to_coverage_enable(descriptor.blend.alpha_to_coverage);

        let depth_state = &descriptor.depth_stencil;
        let has_depth = descriptor.depth_stencil_format.has_depth();
        let has_stencil = descriptor.depth_stencil_format.has_stencil();
        if depth_state.depth_bounds_test && !features.depth_bounds {
            log_unsupported(label, "depth bounds test");
        }
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth && depth_state.depth_test_enabled())
            .depth_write_enable(has_depth && depth_state.depth_write_enabled)
            .depth_compare_op(convert_compare_function(depth_state.depth_compare))
            .depth_bounds_test_enable(
                has_depth && depth_state.depth_bounds_test && features.depth_bounds,
            )
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(has_stencil && depth_state.stencil_test_enabled())
            .front(stencil_op_state(&depth_state.stencil_front, depth_state))
            .back(stencil_op_state(&depth_state.stencil_back, depth_state));

        if descriptor.blend.independent_blend && !features.independent_blend {
            log_unsupported(label, "independent blend");
        }
        let blend_attachments = color_blend_attachments(
            &descriptor.blend,
            descriptor.color_formats.len(),
            descriptor.blend.independent_blend && features.independent_blend,
        );
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(device.dynamic_states());

        let color_formats: Vec<vk::Format> = descriptor
            .color_formats
            .iter()
            .map(|&format| device.native_format(format))
            .collect();
        let depth_format = if has_depth {
            device.native_format(descriptor.depth_stencil_format)
        } else {
            vk::Format::UNDEFINED
        };
        let stencil_format = if has_stencil {
            device.native_format(descriptor.depth_stencil_format)
        } else {
            vk::Format::UNDEFINED
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let mut info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(descriptor.layout.handle())
            .push_next(&mut rendering);
        if descriptor.mesh_shader.is_none() {
            info = info
                .vertex_input_state(&vertex_input_state)
                .input_assembly_state(&input_assembly);
        }

        let pipelines = unsafe {
            device.raw().create_graphics_pipelines(
                device.pipeline_cache(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, e)| format!("{:?}", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| "driver returned no pipeline".to_string())
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::Pipeline::null()
    }

    pub(crate) fn handle(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        if self.is_valid() {
            self.device.defer_destroy(DeferredResource::Pipeline(self.handle));
        }
    }
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("label", &self.label)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Compute pipeline.
pub struct ComputePipeline {
    device: Arc<GraphicsDevice>,
    label: Option<String>,
    layout: Arc<PipelineLayout>,
    handle: vk::Pipeline,
}

impl ComputePipeline {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &ComputePipelineDescriptor,
    ) -> Arc<Self> {
        let handle = match Self::create_handle(device, descriptor) {
            Ok(handle) => {
                if let Some(label) = &descriptor.label {
                    device.debug_names().set_object_name(handle, label);
                }
                log::trace!("Created compute pipeline {:?}", descriptor.label);
                handle
            }
            Err(message) => {
                log::error!(
                    "Failed to create compute pipeline {:?}: {}",
                    descriptor.label,
                    message
                );
                vk::Pipeline::null()
            }
        };
        Arc::new(Self {
            device: Arc::clone(device),
            label: descriptor.label.clone(),
            layout: Arc::clone(&descriptor.layout),
            handle,
        })
    }

    fn create_handle(
        device: &GraphicsDevice,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<vk::Pipeline, String> {
        if !descriptor.layout.is_valid() {
            return Err("pipeline layout is invalid".to_string());
        }
        let shader = &descriptor.shader;
        if shader.stage() != ShaderStage::Compute {
            return Err(format!("expected a compute shader, got {:?}", shader.stage()));
        }
        if !shader.is_valid() {
            return Err("compute shader module is invalid".to_string());
        }
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(shader.entry_point());
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(descriptor.layout.handle());

        let pipelines = unsafe {
            device.raw().create_compute_pipelines(
                device.pipeline_cache(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, e)| format!("{:?}", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| "driver returned no pipeline".to_string())
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::Pipeline::null()
    }

    pub(crate) fn handle(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        if self.is_valid() {
            self.device.defer_destroy(DeferredResource::Pipeline(self.handle));
        }
    }
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("label", &self.label)
            .field("valid", &self.is_valid())
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderPipeline: Send, Sync);
static_assertions::assert_impl_all!(ComputePipeline: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RenderTargetBlendState, VertexFormat, VertexStepMode};
    use rstest::rstest;

    #[rstest]
    #[case::vertex(true, false, false, true)]
    #[case::both(true, false, true, false)]
    #[case::none(false, false, false, false)]
    #[case::amplification_without_mesh(true, true, false, false)]
    #[case::mesh(false, false, true, true)]
    #[case::mesh_with_amplification(false, true, true, true)]
    fn test_validate_render_stages(
        #[case] vertex: bool,
        #[case] amplification: bool,
        #[case] mesh: bool,
        #[case] valid: bool,
    ) {
        let features = AdapterFeatures {
            mesh_shader: true,
            task_shader: true,
            ..Default::default()
        };
        assert_eq!(
            validate_render_stages(vertex, amplification, mesh, &features).is_ok(),
            valid
        );
    }

    #[test]
    fn test_mesh_stage_requires_feature() {
        let features = AdapterFeatures::default();
        assert!(validate_render_stages(false, false, true, &features).is_err());
    }

    #[test]
    fn test_vertex_input_skips_zero_stride() {
        let layouts = [
            VertexBufferLayout::packed(&[VertexFormat::Float32x3, VertexFormat::Float32x2]),
            VertexBufferLayout {
                stride: 0,
                step_mode: VertexStepMode::Vertex,
                attributes: Vec::new(),
            },
            VertexBufferLayout::packed(&[VertexFormat::Float32x4])
                .with_step_mode(VertexStepMode::Instance),
        ];
        let (bindings, attributes) = vertex_input(&layouts);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].stride, 20);
        assert_eq!(bindings[1].binding, 2);
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].binding, 2);
    }

    #[test]
    fn test_blend_attachments_follow_independent_flag() {
        let mut blend = BlendState::uniform(RenderTargetBlendState::OPAQUE);
        blend.render_targets[1] = RenderTargetBlendState::ALPHA_BLEND;
        blend.independent_blend = true;

        let shared = color_blend_attachments(&blend, 2, false);
        assert_eq!(shared[1].blend_enable, vk::FALSE);

        let independent = color_blend_attachments(&blend, 2, true);
        assert_eq!(independent[0].blend_enable, vk::FALSE);
        assert_eq!(independent[1].blend_enable, vk::TRUE);
    }
}
