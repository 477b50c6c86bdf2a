//! Point-light uniform and GPU resources.

use wgpu::util::DeviceExt;

use crate::scene::PointLight;

/// Upper bound of lights the raster shader iterates over. Scene lights past
/// this are dropped with a warning; the path tracer has no such limit.
pub const MAX_LIGHTS: usize = 8;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightsUniform {
    // vec4 slots to satisfy the 16 byte uniform array stride.
    positions: [[f32; 4]; MAX_LIGHTS],
    /// rgb premultiplied with the light intensity.
    colors: [[f32; 4]; MAX_LIGHTS],
    count: [u32; 4],
}

impl LightsUniform {
    pub fn new(lights: &[PointLight]) -> Self {
        if lights.len() > MAX_LIGHTS {
            log::warn!(
                "scene has {} lights, the raster pass only uses the first {}",
                lights.len(),
                MAX_LIGHTS
            );
        }
        let mut uniform = Self {
            positions: [[0.0; 4]; MAX_LIGHTS],
            colors: [[0.0; 4]; MAX_LIGHTS],
            count: [lights.len().min(MAX_LIGHTS) as u32, 0, 0, 0],
        };
        for (i, light) in lights.iter().take(MAX_LIGHTS).enumerate() {
            uniform.positions[i] = [light.position.x, light.position.y, light.position.z, 1.0];
            uniform.colors[i] = [
                light.color[0] * light.intensity,
                light.color[1] * light.intensity,
                light.color[2] * light.intensity,
                0.0,
            ];
        }
        uniform
    }
}

/// Light uniform plus the buffer and bind group the shaders read it through.
pub struct LightResources {
    pub uniform: LightsUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl LightResources {
    pub fn new(lights: &[PointLight], device: &wgpu::Device) -> Self {
        let uniform = LightsUniform::new(lights);
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Light Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group_layout = mk_bind_group_layout(device);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some("light_bind_group"),
        });
        Self {
            uniform,
            buffer,
            bind_group,
            bind_group_layout,
        }
    }

    /// Rewrite the uniform after the asset's lights were merged in.
    pub fn update(&mut self, lights: &[PointLight], queue: &wgpu::Queue) {
        self.uniform = LightsUniform::new(lights);
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.uniform]));
    }
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("light_bind_group_layout"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Point3;

    #[test]
    fn uniform_packs_count_and_premultiplied_color() {
        let lights = vec![
            PointLight {
                position: Point3::new(40.0, 40.0, 40.0),
                color: [1.0, 0.5, 0.25],
                intensity: 2.0,
            };
            2
        ];
        let uniform = LightsUniform::new(&lights);
        assert_eq!(uniform.count[0], 2);
        assert_eq!(uniform.colors[0], [2.0, 1.0, 0.5, 0.0]);
        assert_eq!(uniform.positions[1], [40.0, 40.0, 40.0, 1.0]);
    }

    #[test]
    fn excess_lights_are_truncated() {
        let lights = vec![
            PointLight {
                position: Point3::new(0.0, 0.0, 0.0),
                color: [1.0; 3],
                intensity: 1.0,
            };
            MAX_LIGHTS + 3
        ];
        let uniform = LightsUniform::new(&lights);
        assert_eq!(uniform.count[0], MAX_LIGHTS as u32);
    }
}
