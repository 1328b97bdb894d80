//! Shader reflection output contract
//!
//! Compiled shader binaries are parsed by an external reflector (the
//! [`ShaderReflector`] trait); this module owns the contract of what that
//! parser produces and how its records become an immutable
//! [`BindingLayout`]: one slot per distinct reflected resource, ordered by
//! `(set, binding)`, with block sizes computed by summing member sizes and
//! push-constant declarations collected into `(offset, size)` ranges.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Kind of a shader-declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Uniform buffer block
    UniformBuffer,
    /// Storage buffer block
    StorageBuffer,
    /// Sampled image (combined with a sampler at bind time)
    SampledImage,
    /// Storage image
    StorageImage,
    /// Input attachment
    InputAttachment,
    /// Ray-tracing acceleration structure
    AccelerationStructure,
    /// Push-constant block (no descriptor slot; becomes a range)
    PushConstant,
}

/// One member of a block-typed resource
///
/// Sizing follows the reflector contract exactly: a member occupies
/// `component width x vector width x matrix columns` bytes. Scalars have
/// vector width and column count 1; vectors have column count 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockMember {
    /// Width of one component in bytes (4 for 32-bit types)
    pub component_width: u32,
    /// Number of components per column vector
    pub vector_width: u32,
    /// Number of matrix columns
    pub matrix_columns: u32,
}

impl BlockMember {
    /// A scalar member of the given component width
    pub fn scalar(component_width: u32) -> Self {
        Self { component_width, vector_width: 1, matrix_columns: 1 }
    }

    /// A vector member
    pub fn vector(component_width: u32, vector_width: u32) -> Self {
        Self { component_width, vector_width, matrix_columns: 1 }
    }

    /// A matrix member
    pub fn matrix(component_width: u32, vector_width: u32, matrix_columns: u32) -> Self {
        Self { component_width, vector_width, matrix_columns }
    }

    /// Byte size of this member
    pub fn byte_size(&self) -> u32 {
        self.component_width * self.vector_width * self.matrix_columns
    }
}

/// One resource enumerated by the external reflector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedResource {
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Resource kind
    pub kind: ResourceKind,
    /// Array element count (1 for non-arrays)
    pub count: u32,
    /// Byte offset; meaningful for push-constant blocks only
    pub offset: u32,
    /// Block members; empty for non-block resources (images, samplers)
    pub members: Vec<BlockMember>,
}

impl ReflectedResource {
    /// Computed byte size of the resource's block, 0 for non-blocks
    pub fn block_size(&self) -> u32 {
        self.members.iter().map(BlockMember::byte_size).sum()
    }
}

/// One descriptor slot of a binding layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Resource kind
    pub kind: ResourceKind,
    /// Array element count
    pub count: u32,
    /// Computed block byte size (0 for non-block resources)
    pub byte_size: u32,
}

/// One push-constant range of a binding layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Byte offset of the range
    pub offset: u32,
    /// Byte size of the range
    pub size: u32,
}

/// Immutable binding layout derived from reflection, one per shader
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingLayout {
    slots: Vec<BindingSlot>,
    push_constants: Vec<PushConstantRange>,
}

impl BindingLayout {
    /// Build a layout from the reflector's resource records
    ///
    /// Slots are ordered by `(set, binding)`; a duplicate `(set, binding)`
    /// pair keeps the first record and logs the collision, since the
    /// reflector contract promises one entry per distinct resource.
    pub fn from_resources(resources: &[ReflectedResource]) -> Self {
        let mut slots: Vec<BindingSlot> = Vec::new();
        let mut push_constants: Vec<PushConstantRange> = Vec::new();

        for resource in resources {
            if resource.kind == ResourceKind::PushConstant {
                push_constants.push(PushConstantRange {
                    offset: resource.offset,
                    size: resource.block_size(),
                });
                continue;
            }
            if slots
                .iter()
                .any(|s| s.set == resource.set && s.binding == resource.binding)
            {
                log::warn!(
                    "Duplicate reflected resource at set {} binding {}, keeping first",
                    resource.set,
                    resource.binding
                );
                continue;
            }
            slots.push(BindingSlot {
                set: resource.set,
                binding: resource.binding,
                kind: resource.kind,
                count: resource.count,
                byte_size: resource.block_size(),
            });
        }

        slots.sort_by_key(|s| (s.set, s.binding));
        push_constants.sort_by_key(|r| r.offset);
        Self { slots, push_constants }
    }

    /// All descriptor slots, ordered by `(set, binding)`
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Look up the slot at a `(set, binding)` pair
    ///
    /// The same binding index may appear in several sets; the pair is the
    /// slot's identity.
    pub fn slot(&self, set: u32, binding: u32) -> Option<&BindingSlot> {
        self.slots.iter().find(|s| s.set == set && s.binding == binding)
    }

    /// All push-constant ranges, ordered by offset
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constants
    }

    /// Number of descriptor slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Descriptor count per resource kind
    ///
    /// Used to size descriptor pools: each slot contributes its array
    /// count to its kind's bucket.
    pub fn kind_histogram(&self) -> HashMap<ResourceKind, u32> {
        let mut histogram = HashMap::new();
        for slot in &self.slots {
            *histogram.entry(slot.kind).or_insert(0) += slot.count;
        }
        histogram
    }
}

/// Reflection and shader-binary errors
#[derive(thiserror::Error, Debug)]
pub enum ReflectError {
    /// Binary length is not a whole number of SPIR-V words
    #[error("shader binary of {len} bytes is not 4-byte aligned")]
    Misaligned {
        /// Byte length of the rejected binary
        len: usize,
    },

    /// The binary could not be read from disk
    #[error("failed to read shader binary: {0}")]
    Io(#[from] std::io::Error),

    /// The external parser rejected the binary
    #[error("shader reflection failed: {reason}")]
    Parse {
        /// Parser-provided description
        reason: String,
    },
}

/// Opaque compiled shader code
///
/// Stored as 32-bit words; construction from bytes validates 4-byte
/// alignment before any parser sees the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinary {
    words: Vec<u32>,
}

impl ShaderBinary {
    /// Build a binary from raw bytes, validating word alignment
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReflectError> {
        if bytes.len() % 4 != 0 {
            log::error!("Shader binary alignment check failed: {} bytes", bytes.len());
            return Err(ReflectError::Misaligned { len: bytes.len() });
        }
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { words })
    }

    /// Load a binary from a file on disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ReflectError> {
        let path = path.as_ref();
        log::debug!("Loading shader binary from {:?}", path);
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// The code as 32-bit words
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// External reflection capability consuming opaque shader code
pub trait ShaderReflector {
    /// Enumerate the resources a shader binary declares
    fn reflect(&self, binary: &ShaderBinary) -> Result<Vec<ReflectedResource>, ReflectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(set: u32, binding: u32, members: Vec<BlockMember>) -> ReflectedResource {
        ReflectedResource {
            set,
            binding,
            kind: ResourceKind::UniformBuffer,
            count: 1,
            offset: 0,
            members,
        }
    }

    #[test]
    fn block_size_sums_member_sizes() {
        // mat4 + vec3 + float, all 32-bit: 64 + 12 + 4
        let resource = uniform(
            0,
            0,
            vec![
                BlockMember::matrix(4, 4, 4),
                BlockMember::vector(4, 3),
                BlockMember::scalar(4),
            ],
        );
        assert_eq!(resource.block_size(), 80);
    }

    #[test]
    fn layout_orders_slots_by_set_then_binding() {
        let layout = BindingLayout::from_resources(&[
            uniform(1, 0, vec![BlockMember::scalar(4)]),
            uniform(0, 2, vec![BlockMember::scalar(4)]),
            uniform(0, 1, vec![BlockMember::scalar(4)]),
        ]);
        let order: Vec<(u32, u32)> = layout.slots().iter().map(|s| (s.set, s.binding)).collect();
        assert_eq!(order, vec![(0, 1), (0, 2), (1, 0)]);
    }

    #[test]
    fn push_constants_become_ranges_not_slots() {
        let layout = BindingLayout::from_resources(&[
            uniform(0, 0, vec![BlockMember::scalar(4)]),
            ReflectedResource {
                set: 0,
                binding: 0,
                kind: ResourceKind::PushConstant,
                count: 1,
                offset: 64,
                members: vec![BlockMember::matrix(4, 4, 4)],
            },
            ReflectedResource {
                set: 0,
                binding: 0,
                kind: ResourceKind::PushConstant,
                count: 1,
                offset: 0,
                members: vec![BlockMember::vector(4, 4)],
            },
        ]);

        assert_eq!(layout.slot_count(), 1);
        assert_eq!(
            layout.push_constant_ranges(),
            &[
                PushConstantRange { offset: 0, size: 16 },
                PushConstantRange { offset: 64, size: 64 },
            ]
        );
    }

    #[test]
    fn duplicate_bindings_keep_the_first_record() {
        let layout = BindingLayout::from_resources(&[
            uniform(0, 3, vec![BlockMember::scalar(4)]),
            uniform(0, 3, vec![BlockMember::matrix(4, 4, 4)]),
        ]);
        assert_eq!(layout.slot_count(), 1);
        assert_eq!(layout.slot(0, 3).map(|s| s.byte_size), Some(4));
    }

    #[test]
    fn same_binding_index_in_two_sets_resolves_per_set() {
        let mut image = uniform(1, 0, Vec::new());
        image.kind = ResourceKind::SampledImage;
        let layout = BindingLayout::from_resources(&[
            uniform(0, 0, vec![BlockMember::scalar(4)]),
            image,
        ]);

        assert_eq!(layout.slot_count(), 2);
        assert_eq!(layout.slot(0, 0).map(|s| s.kind), Some(ResourceKind::UniformBuffer));
        assert_eq!(layout.slot(1, 0).map(|s| s.kind), Some(ResourceKind::SampledImage));
        assert!(layout.slot(2, 0).is_none());
    }

    #[test]
    fn histogram_counts_array_elements() {
        let mut image = uniform(0, 1, Vec::new());
        image.kind = ResourceKind::SampledImage;
        image.count = 4;
        let layout = BindingLayout::from_resources(&[
            uniform(0, 0, vec![BlockMember::scalar(4)]),
            image,
        ]);
        let histogram = layout.kind_histogram();
        assert_eq!(histogram[&ResourceKind::UniformBuffer], 1);
        assert_eq!(histogram[&ResourceKind::SampledImage], 4);
    }

    #[test]
    fn misaligned_binary_is_rejected() {
        assert!(matches!(
            ShaderBinary::from_bytes(&[0, 1, 2]),
            Err(ReflectError::Misaligned { len: 3 })
        ));
        let binary = ShaderBinary::from_bytes(&[0x03, 0x02, 0x23, 0x07]).unwrap();
        assert_eq!(binary.words(), &[0x0723_0203]);
    }
}
