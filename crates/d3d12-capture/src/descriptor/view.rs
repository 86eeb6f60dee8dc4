//! Plain-data view descriptions stored inside descriptors.
//!
//! All of these are `Copy` so a descriptor can be rebuilt into a native view call without
//! touching the heap lock for longer than a clone.

use bytemuck::{Pod, Zeroable};

use crate::error::SerialiseError;
use crate::resource::{Format, ResourceDesc, ResourceDimension};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ViewDimension {
    /// No explicit description was supplied; the driver derives the view from the resource.
    #[default]
    Unknown = 0,
    Buffer = 1,
    Texture1D = 2,
    Texture1DArray = 3,
    Texture2D = 4,
    Texture2DArray = 5,
    Texture2DMs = 6,
    Texture2DMsArray = 7,
    Texture3D = 8,
    TextureCube = 9,
    TextureCubeArray = 10,
}

impl ViewDimension {
    pub fn from_u32(v: u32) -> Result<Self, SerialiseError> {
        Ok(match v {
            0 => Self::Unknown,
            1 => Self::Buffer,
            2 => Self::Texture1D,
            3 => Self::Texture1DArray,
            4 => Self::Texture2D,
            5 => Self::Texture2DArray,
            6 => Self::Texture2DMs,
            7 => Self::Texture2DMsArray,
            8 => Self::Texture3D,
            9 => Self::TextureCube,
            10 => Self::TextureCubeArray,
            other => return Err(SerialiseError::UnknownViewDimension(other)),
        })
    }

    /// Dimension of the view the driver would create for `desc` when no description is given.
    pub fn default_for(desc: &ResourceDesc) -> Self {
        match desc.dimension {
            ResourceDimension::Unknown => Self::Unknown,
            ResourceDimension::Buffer => Self::Buffer,
            ResourceDimension::Texture1D if desc.depth_or_array_size > 1 => Self::Texture1DArray,
            ResourceDimension::Texture1D => Self::Texture1D,
            ResourceDimension::Texture2D => match (desc.is_multisampled(), desc.depth_or_array_size > 1) {
                (true, true) => Self::Texture2DMsArray,
                (true, false) => Self::Texture2DMs,
                (false, true) => Self::Texture2DArray,
                (false, false) => Self::Texture2D,
            },
            ResourceDimension::Texture3D => Self::Texture3D,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferView {
    pub first_element: u64,
    pub num_elements: u32,
    pub structure_byte_stride: u32,
    /// Only meaningful for unordered access views.
    pub counter_offset_in_bytes: u64,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TextureView {
    pub mip_slice: u32,
    pub mip_levels: u32,
    /// First array slice, or first depth slice for 3D textures.
    pub first_array_slice: u32,
    pub array_size: u32,
    pub plane_slice: u32,
    pub min_lod_clamp: f32,
}

/// The subresource range a view covers, interpreted according to its [`ViewDimension`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ViewRange {
    Buffer(BufferView),
    Texture(TextureView),
}

impl Default for ViewRange {
    fn default() -> Self {
        Self::Texture(TextureView::default())
    }
}

impl ViewRange {
    /// Packed form used by encoded descriptor records.
    pub(crate) fn to_words(self) -> [u32; 6] {
        match self {
            Self::Buffer(b) => [
                b.first_element as u32,
                (b.first_element >> 32) as u32,
                b.num_elements,
                b.structure_byte_stride,
                b.flags,
                0,
            ],
            Self::Texture(t) => [
                t.mip_slice,
                t.mip_levels,
                t.first_array_slice,
                t.array_size,
                t.plane_slice,
                t.min_lod_clamp.to_bits(),
            ],
        }
    }

    pub(crate) fn from_words(dimension: ViewDimension, w: [u32; 6]) -> Self {
        if dimension == ViewDimension::Buffer {
            Self::Buffer(BufferView {
                first_element: u64::from(w[0]) | (u64::from(w[1]) << 32),
                num_elements: w[2],
                structure_byte_stride: w[3],
                counter_offset_in_bytes: 0,
                flags: w[4],
            })
        } else {
            Self::Texture(TextureView {
                mip_slice: w[0],
                mip_levels: w[1],
                first_array_slice: w[2],
                array_size: w[3],
                plane_slice: w[4],
                min_lod_clamp: f32::from_bits(w[5]),
            })
        }
    }
}

/// Sampler state. Laid out exactly as it is persisted; `filter` shares its slot with the
/// descriptor type tag, so valid filters are always below [`super::DESCRIPTOR_TYPE_SENTINEL`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SamplerDesc {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

const _: () = assert!(std::mem::size_of::<SamplerDesc>() == 52);

impl SamplerDesc {
    /// Sampler written into sampler heap slots that were never initialised.
    pub fn null() -> Self {
        Self {
            // point filter, wrap addressing
            address_u: 1,
            address_v: 1,
            address_w: 1,
            max_anisotropy: 1,
            comparison_func: 1,
            max_lod: f32::MAX,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstantBufferViewDesc {
    pub buffer_location: u64,
    pub size_in_bytes: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShaderResourceViewDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub component_mapping: u32,
    pub range: ViewRange,
}

/// Default swizzle (`D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING`).
pub const DEFAULT_COMPONENT_MAPPING: u32 = 0x1688;

impl ShaderResourceViewDesc {
    /// Description used when a null resource is bound without an explicit description.
    pub fn null_view() -> Self {
        Self {
            format: Format::R8G8B8A8_UNORM,
            dimension: ViewDimension::Texture2D,
            component_mapping: DEFAULT_COMPONENT_MAPPING,
            range: ViewRange::Texture(TextureView {
                mip_levels: 1,
                ..TextureView::default()
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UnorderedAccessViewDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub range: ViewRange,
}

impl UnorderedAccessViewDesc {
    pub fn null_view() -> Self {
        Self {
            format: Format::R8G8B8A8_UNORM,
            dimension: ViewDimension::Texture2D,
            range: ViewRange::Texture(TextureView::default()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderTargetViewDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub range: ViewRange,
}

impl RenderTargetViewDesc {
    pub fn null_view() -> Self {
        Self {
            format: Format::R8G8B8A8_UNORM,
            dimension: ViewDimension::Texture2D,
            range: ViewRange::Texture(TextureView::default()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthStencilViewDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub flags: u32,
    pub range: ViewRange,
}

impl DepthStencilViewDesc {
    pub fn null_view() -> Self {
        Self {
            format: Format::D32_FLOAT,
            dimension: ViewDimension::Texture2D,
            flags: 0,
            range: ViewRange::Texture(TextureView::default()),
        }
    }
}

/// [`UnorderedAccessViewDesc`] compressed to 32 bytes so that a UAV together with its counter
/// resource fits in a 64-byte descriptor record.
///
/// Format, dimension and buffer flags never exceed a byte. The payload holds either the buffer
/// range `[first lo, first hi, num, stride, counter lo, counter hi]` or the texture range
/// `[mip slice, first slice, array size, plane slice]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SqueezedUavDesc {
    pub format: u8,
    pub view_dimension: u8,
    pub buffer_flags: u8,
    _pad: [u8; 5],
    pub payload: [u32; 6],
}

const _: () = assert!(std::mem::size_of::<SqueezedUavDesc>() == 32);

impl SqueezedUavDesc {
    pub fn from_desc(desc: &UnorderedAccessViewDesc) -> Self {
        debug_assert!(desc.format.0 <= u32::from(u8::MAX), "UAV format {:?} does not fit a byte", desc.format);

        let (buffer_flags, payload) = match desc.range {
            ViewRange::Buffer(b) => (
                b.flags as u8,
                [
                    b.first_element as u32,
                    (b.first_element >> 32) as u32,
                    b.num_elements,
                    b.structure_byte_stride,
                    b.counter_offset_in_bytes as u32,
                    (b.counter_offset_in_bytes >> 32) as u32,
                ],
            ),
            ViewRange::Texture(t) => (
                0,
                [t.mip_slice, t.first_array_slice, t.array_size, t.plane_slice, 0, 0],
            ),
        };

        Self {
            format: desc.format.0 as u8,
            view_dimension: desc.dimension as u8,
            buffer_flags,
            _pad: [0; 5],
            payload,
        }
    }

    pub fn as_desc(&self) -> Result<UnorderedAccessViewDesc, SerialiseError> {
        let dimension = ViewDimension::from_u32(u32::from(self.view_dimension))?;
        let p = self.payload;
        let range = if dimension == ViewDimension::Buffer {
            ViewRange::Buffer(BufferView {
                first_element: u64::from(p[0]) | (u64::from(p[1]) << 32),
                num_elements: p[2],
                structure_byte_stride: p[3],
                counter_offset_in_bytes: u64::from(p[4]) | (u64::from(p[5]) << 32),
                flags: u32::from(self.buffer_flags),
            })
        } else {
            ViewRange::Texture(TextureView {
                mip_slice: p[0],
                first_array_slice: p[1],
                array_size: p[2],
                plane_slice: p[3],
                ..TextureView::default()
            })
        };

        Ok(UnorderedAccessViewDesc {
            format: Format(u32::from(self.format)),
            dimension,
            range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squeezed_uav_keeps_buffer_range_and_counter_offset() {
        let desc = UnorderedAccessViewDesc {
            format: Format::R32_UINT,
            dimension: ViewDimension::Buffer,
            range: ViewRange::Buffer(BufferView {
                first_element: 0x1_0000_0004,
                num_elements: 64,
                structure_byte_stride: 16,
                counter_offset_in_bytes: 4096,
                flags: 1,
            }),
        };

        let squeezed = SqueezedUavDesc::from_desc(&desc);
        assert_eq!(squeezed.as_desc().unwrap(), desc);
    }

    #[test]
    fn squeezed_uav_keeps_texture_slices() {
        let desc = UnorderedAccessViewDesc {
            format: Format::R8G8B8A8_UNORM,
            dimension: ViewDimension::Texture2DArray,
            range: ViewRange::Texture(TextureView {
                mip_slice: 2,
                first_array_slice: 1,
                array_size: 3,
                ..TextureView::default()
            }),
        };

        assert_eq!(SqueezedUavDesc::from_desc(&desc).as_desc().unwrap(), desc);
    }

    #[test]
    fn default_dimension_follows_resource_shape() {
        let mut desc = ResourceDesc::texture_2d(16, 16, 1, Format::R8G8B8A8_UNORM);
        assert_eq!(ViewDimension::default_for(&desc), ViewDimension::Texture2D);
        desc.sample_count = 4;
        assert_eq!(ViewDimension::default_for(&desc), ViewDimension::Texture2DMs);
        assert_eq!(ViewDimension::default_for(&ResourceDesc::buffer(4)), ViewDimension::Buffer);
    }

    #[test]
    fn unknown_view_dimension_is_rejected() {
        assert!(matches!(
            ViewDimension::from_u32(11),
            Err(SerialiseError::UnknownViewDimension(11))
        ));
    }
}
