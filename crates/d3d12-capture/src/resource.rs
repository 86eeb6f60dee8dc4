//! Plain-data descriptions of GPU resources as reported by the driver wrappers.

use bitflags::bitflags;

/// DXGI format value. Only the handful of values this crate needs to name are constants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Format(pub u32);

impl Format {
    pub const UNKNOWN: Format = Format(0);
    pub const R32G32B32A32_FLOAT: Format = Format(2);
    pub const R8G8B8A8_UNORM: Format = Format(28);
    pub const R32_TYPELESS: Format = Format(39);
    pub const D32_FLOAT: Format = Format(40);
    pub const R32_UINT: Format = Format(42);
    pub const D24_UNORM_S8_UINT: Format = Format(45);
    pub const D16_UNORM: Format = Format(55);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResourceDimension {
    #[default]
    Unknown = 0,
    Buffer = 1,
    Texture1D = 2,
    Texture2D = 3,
    Texture3D = 4,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 0x1;
        const ALLOW_DEPTH_STENCIL = 0x2;
        const ALLOW_UNORDERED_ACCESS = 0x4;
        const DENY_SHADER_RESOURCE = 0x8;
        const ALLOW_CROSS_ADAPTER = 0x10;
        const ALLOW_SIMULTANEOUS_ACCESS = 0x20;
    }
}

/// Memory pool a committed or placed resource lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HeapType {
    #[default]
    Default = 1,
    Upload = 2,
    Readback = 3,
    Custom = 4,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    pub alignment: u64,
    /// Byte size for buffers, texel width for textures.
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    pub fn buffer(byte_size: u64) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: byte_size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            ..Self::default()
        }
    }

    pub fn texture_2d(width: u64, height: u32, mip_levels: u16, format: Format) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            width,
            height,
            depth_or_array_size: 1,
            mip_levels,
            format,
            sample_count: 1,
            ..Self::default()
        }
    }

    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    /// Number of subresources, ignoring planar formats.
    pub fn subresource_count(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Buffer | ResourceDimension::Unknown => 1,
            ResourceDimension::Texture3D => u32::from(self.mip_levels.max(1)),
            ResourceDimension::Texture1D | ResourceDimension::Texture2D => {
                u32::from(self.mip_levels.max(1)) * u32::from(self.depth_or_array_size.max(1))
            }
        }
    }

    /// True when the resource can be bound for output, so its pre-frame contents may survive
    /// into the frame partially overwritten.
    pub fn is_output_target(&self) -> bool {
        self.flags.intersects(
            ResourceFlags::ALLOW_RENDER_TARGET
                | ResourceFlags::ALLOW_DEPTH_STENCIL
                | ResourceFlags::ALLOW_UNORDERED_ACCESS,
        )
    }
}

/// Optimized clear value supplied at resource creation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color { format: Format, color: [f32; 4] },
    DepthStencil { format: Format, depth: f32, stencil: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_count_covers_mips_and_slices() {
        assert_eq!(ResourceDesc::buffer(256).subresource_count(), 1);

        let mut tex = ResourceDesc::texture_2d(64, 64, 4, Format::R8G8B8A8_UNORM);
        assert_eq!(tex.subresource_count(), 4);
        tex.depth_or_array_size = 6;
        assert_eq!(tex.subresource_count(), 24);

        tex.dimension = ResourceDimension::Texture3D;
        assert_eq!(tex.subresource_count(), 4);
    }

    #[test]
    fn output_targets_are_detected_by_flags() {
        let mut tex = ResourceDesc::texture_2d(8, 8, 1, Format::R8G8B8A8_UNORM);
        assert!(!tex.is_output_target());
        tex.flags |= ResourceFlags::ALLOW_RENDER_TARGET;
        assert!(tex.is_output_target());
    }
}
