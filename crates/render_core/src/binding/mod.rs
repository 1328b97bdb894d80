//! Resource binding
//!
//! A [`ResourcePackage`] maps concrete buffers and images onto a
//! reflected [`BindingLayout`]. Packages are mutable and dirty-tracked:
//! `prepare()` validates that every declared slot is bound and
//! materializes the ordered write list the backend turns into descriptor
//! updates. One package may back many draw calls.
//!
//! Samplers are deduplicated per device through [`SamplerCache`]: one
//! sampler object per distinct [`SamplerSpec`], shared by every package
//! that requests the same specification.

use std::collections::HashMap;
use std::sync::Arc;

use crate::reflect::{BindingLayout, ResourceKind};
use crate::resource::{BufferId, ImageId, SamplerId};

/// A concrete resource attached to a binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    /// A buffer region
    Buffer {
        /// Buffer handle
        buffer: BufferId,
        /// Byte offset into the buffer
        offset: u64,
    },
    /// An image view paired with a sampler
    Image {
        /// Image handle
        image: ImageId,
        /// Sampler handle (from the device's [`SamplerCache`])
        sampler: SamplerId,
    },
}

impl BoundResource {
    fn matches_kind(&self, kind: ResourceKind) -> bool {
        match self {
            Self::Buffer { .. } => matches!(
                kind,
                ResourceKind::UniformBuffer
                    | ResourceKind::StorageBuffer
                    | ResourceKind::AccelerationStructure
            ),
            Self::Image { .. } => matches!(
                kind,
                ResourceKind::SampledImage
                    | ResourceKind::StorageImage
                    | ResourceKind::InputAttachment
            ),
        }
    }
}

/// One materialized descriptor write produced by `prepare()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingWrite {
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Resource kind of the slot
    pub kind: ResourceKind,
    /// Array element the resource occupies
    pub array_element: u32,
    /// The bound resource
    pub resource: BoundResource,
}

/// Resource binding failures
#[derive(thiserror::Error, Debug)]
pub enum BindingError {
    /// The `(set, binding)` pair is not declared by the package's layout
    #[error("set {set} binding {binding} is not declared by the layout")]
    InvalidBinding {
        /// The violating set index
        set: u32,
        /// The violating binding index
        binding: u32,
    },

    /// The resource does not match the slot's declared kind
    #[error("set {set} binding {binding} is declared as {expected:?}, resource does not match")]
    KindMismatch {
        /// The violating set index
        set: u32,
        /// The violating binding index
        binding: u32,
        /// The kind the layout declares
        expected: ResourceKind,
    },

    /// The array element is outside the slot's declared count
    #[error("array element {element} exceeds declared count {count} at set {set} binding {binding}")]
    ElementOutOfRange {
        /// The violating set index
        set: u32,
        /// The violating binding index
        binding: u32,
        /// The requested array element
        element: u32,
        /// The declared element count
        count: u32,
    },

    /// `prepare()` found declared slots with no bound resource
    #[error("resource package is incomplete, unbound (set, binding) pairs: {missing:?}")]
    IncompletePackage {
        /// `(set, binding)` pairs with no bound resource
        missing: Vec<(u32, u32)>,
    },
}

/// Mutable mapping of concrete resources onto a binding layout
pub struct ResourcePackage {
    layout: Arc<BindingLayout>,
    // (set, binding, array_element) -> resource
    bound: HashMap<(u32, u32, u32), BoundResource>,
    writes: Vec<BindingWrite>,
    dirty: bool,
}

impl ResourcePackage {
    /// Create a package with every declared slot unbound
    pub fn new(layout: Arc<BindingLayout>) -> Self {
        Self {
            layout,
            bound: HashMap::new(),
            writes: Vec::new(),
            dirty: true,
        }
    }

    /// The layout this package binds against
    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    /// Attach a resource to array element 0 of a binding slot
    pub fn bind(
        &mut self,
        set: u32,
        binding: u32,
        resource: BoundResource,
    ) -> Result<(), BindingError> {
        self.bind_element(set, binding, 0, resource)
    }

    /// Attach a resource to a specific array element of a binding slot
    pub fn bind_element(
        &mut self,
        set: u32,
        binding: u32,
        array_element: u32,
        resource: BoundResource,
    ) -> Result<(), BindingError> {
        let slot = self
            .layout
            .slot(set, binding)
            .ok_or(BindingError::InvalidBinding { set, binding })?;
        if !resource.matches_kind(slot.kind) {
            return Err(BindingError::KindMismatch { set, binding, expected: slot.kind });
        }
        if array_element >= slot.count {
            return Err(BindingError::ElementOutOfRange {
                set,
                binding,
                element: array_element,
                count: slot.count,
            });
        }

        self.bound.insert((set, binding, array_element), resource);
        self.dirty = true;
        Ok(())
    }

    /// Whether a bind has happened since the last successful `prepare()`
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the package has been prepared and not dirtied since
    pub fn is_prepared(&self) -> bool {
        !self.dirty
    }

    /// Validate completeness and materialize the write list
    ///
    /// Idempotent when the package is clean. Every `(set, binding)` pair
    /// the layout declares must have at least one bound resource; an
    /// unbound slot is a fatal contract violation, not a recoverable
    /// condition.
    pub fn prepare(&mut self) -> Result<&[BindingWrite], BindingError> {
        if !self.dirty {
            return Ok(&self.writes);
        }

        let missing: Vec<(u32, u32)> = self
            .layout
            .slots()
            .iter()
            .filter(|slot| {
                !self
                    .bound
                    .keys()
                    .any(|(set, binding, _)| *set == slot.set && *binding == slot.binding)
            })
            .map(|slot| (slot.set, slot.binding))
            .collect();
        if !missing.is_empty() {
            return Err(BindingError::IncompletePackage { missing });
        }

        self.writes.clear();
        for slot in self.layout.slots() {
            for element in 0..slot.count {
                if let Some(resource) = self.bound.get(&(slot.set, slot.binding, element)) {
                    self.writes.push(BindingWrite {
                        set: slot.set,
                        binding: slot.binding,
                        kind: slot.kind,
                        array_element: element,
                        resource: *resource,
                    });
                }
            }
        }
        self.dirty = false;
        Ok(&self.writes)
    }

    /// The write list from the last successful `prepare()`
    pub fn writes(&self) -> &[BindingWrite] {
        &self.writes
    }
}

/// Texel filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest-texel sampling
    Nearest,
    /// Linear interpolation
    Linear,
}

/// Mipmap selection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MipmapMode {
    /// Nearest mip level
    Nearest,
    /// Linear blend between mip levels
    Linear,
}

/// Texture coordinate addressing outside [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Wrap around
    Repeat,
    /// Wrap around, mirrored
    MirroredRepeat,
    /// Clamp to the edge texel
    ClampToEdge,
    /// Clamp to the border color
    ClampToBorder,
}

/// Value-equal sampler specification used as the dedup cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerSpec {
    /// Magnification filter
    pub mag_filter: Filter,
    /// Minification filter
    pub min_filter: Filter,
    /// Mipmap selection
    pub mipmap_mode: MipmapMode,
    /// Addressing along U
    pub address_u: AddressMode,
    /// Addressing along V
    pub address_v: AddressMode,
    /// Addressing along W
    pub address_w: AddressMode,
    /// Maximum anisotropy in whole samples, `None` to disable
    pub max_anisotropy: Option<u8>,
}

impl Default for SamplerSpec {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: MipmapMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            max_anisotropy: Some(16),
        }
    }
}

/// Backend capability that creates sampler objects
pub trait SamplerFactory {
    /// Factory failure type
    type Error;

    /// Create a sampler matching `spec` and return its handle
    fn create_sampler(&mut self, spec: &SamplerSpec) -> Result<SamplerId, Self::Error>;
}

/// Per-device sampler deduplication cache
///
/// Lifetime is tied to the device that owns the factory; lookups are by
/// value equality of the specification.
#[derive(Default)]
pub struct SamplerCache {
    samplers: HashMap<SamplerSpec, SamplerId>,
}

impl SamplerCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the sampler for `spec`, creating it on first use
    pub fn get_or_create<F: SamplerFactory>(
        &mut self,
        factory: &mut F,
        spec: SamplerSpec,
    ) -> Result<SamplerId, F::Error> {
        if let Some(&sampler) = self.samplers.get(&spec) {
            return Ok(sampler);
        }
        let sampler = factory.create_sampler(&spec)?;
        log::debug!("Created sampler for spec {:?}", spec);
        self.samplers.insert(spec, sampler);
        Ok(sampler)
    }

    /// Number of distinct samplers created so far
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    /// Whether no sampler has been created yet
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{BlockMember, ReflectedResource};
    use slotmap::SlotMap;

    fn two_slot_layout() -> Arc<BindingLayout> {
        Arc::new(BindingLayout::from_resources(&[
            ReflectedResource {
                set: 0,
                binding: 0,
                kind: ResourceKind::UniformBuffer,
                count: 1,
                offset: 0,
                members: vec![BlockMember::matrix(4, 4, 4)],
            },
            ReflectedResource {
                set: 0,
                binding: 1,
                kind: ResourceKind::SampledImage,
                count: 1,
                offset: 0,
                members: Vec::new(),
            },
        ]))
    }

    fn handles() -> (BufferId, ImageId, SamplerId) {
        let mut buffers: SlotMap<BufferId, ()> = SlotMap::with_key();
        let mut images: SlotMap<ImageId, ()> = SlotMap::with_key();
        let mut samplers: SlotMap<SamplerId, ()> = SlotMap::with_key();
        (buffers.insert(()), images.insert(()), samplers.insert(()))
    }

    #[test]
    fn prepare_fails_until_every_slot_is_bound() {
        let (buffer, image, sampler) = handles();
        let mut package = ResourcePackage::new(two_slot_layout());

        package.bind(0, 0, BoundResource::Buffer { buffer, offset: 0 }).unwrap();
        let err = package.prepare().unwrap_err();
        assert!(matches!(err, BindingError::IncompletePackage { ref missing } if missing == &[(0, 1)]));

        package.bind(0, 1, BoundResource::Image { image, sampler }).unwrap();
        let writes = package.prepare().unwrap();
        assert_eq!(writes.len(), 2);
        assert!(package.is_prepared());
    }

    #[test]
    fn prepare_is_idempotent_when_clean() {
        let (buffer, image, sampler) = handles();
        let mut package = ResourcePackage::new(two_slot_layout());
        package.bind(0, 0, BoundResource::Buffer { buffer, offset: 64 }).unwrap();
        package.bind(0, 1, BoundResource::Image { image, sampler }).unwrap();

        let first: Vec<BindingWrite> = package.prepare().unwrap().to_vec();
        let second: Vec<BindingWrite> = package.prepare().unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn rebinding_marks_the_package_dirty() {
        let (buffer, image, sampler) = handles();
        let mut package = ResourcePackage::new(two_slot_layout());
        package.bind(0, 0, BoundResource::Buffer { buffer, offset: 0 }).unwrap();
        package.bind(0, 1, BoundResource::Image { image, sampler }).unwrap();
        package.prepare().unwrap();
        assert!(!package.is_dirty());

        package.bind(0, 0, BoundResource::Buffer { buffer, offset: 256 }).unwrap();
        assert!(package.is_dirty());
        let writes = package.prepare().unwrap();
        assert!(matches!(
            writes[0].resource,
            BoundResource::Buffer { offset: 256, .. }
        ));
    }

    #[test]
    fn unknown_binding_is_a_contract_violation() {
        let (buffer, _, _) = handles();
        let mut package = ResourcePackage::new(two_slot_layout());
        let err = package.bind(0, 7, BoundResource::Buffer { buffer, offset: 0 }).unwrap_err();
        assert!(matches!(err, BindingError::InvalidBinding { set: 0, binding: 7 }));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let (buffer, _, _) = handles();
        let mut package = ResourcePackage::new(two_slot_layout());
        let err = package.bind(0, 1, BoundResource::Buffer { buffer, offset: 0 }).unwrap_err();
        assert!(matches!(
            err,
            BindingError::KindMismatch { set: 0, binding: 1, expected: ResourceKind::SampledImage }
        ));
    }

    #[test]
    fn same_binding_index_in_two_sets_binds_independently() {
        let (buffer, image, sampler) = handles();
        let layout = Arc::new(BindingLayout::from_resources(&[
            ReflectedResource {
                set: 0,
                binding: 0,
                kind: ResourceKind::UniformBuffer,
                count: 1,
                offset: 0,
                members: vec![BlockMember::scalar(4)],
            },
            ReflectedResource {
                set: 1,
                binding: 0,
                kind: ResourceKind::SampledImage,
                count: 1,
                offset: 0,
                members: Vec::new(),
            },
        ]));
        let mut package = ResourcePackage::new(layout);

        package.bind(0, 0, BoundResource::Buffer { buffer, offset: 0 }).unwrap();
        // The image slot shares binding index 0 but lives in set 1; the
        // buffer bound to set 0 must not satisfy or shadow it.
        let err = package.prepare().unwrap_err();
        assert!(matches!(err, BindingError::IncompletePackage { ref missing } if missing == &[(1, 0)]));

        let err = package.bind(1, 0, BoundResource::Buffer { buffer, offset: 0 }).unwrap_err();
        assert!(matches!(
            err,
            BindingError::KindMismatch { set: 1, binding: 0, expected: ResourceKind::SampledImage }
        ));

        package.bind(1, 0, BoundResource::Image { image, sampler }).unwrap();
        let writes = package.prepare().unwrap();
        let targets: Vec<(u32, u32, ResourceKind)> =
            writes.iter().map(|w| (w.set, w.binding, w.kind)).collect();
        assert_eq!(
            targets,
            vec![
                (0, 0, ResourceKind::UniformBuffer),
                (1, 0, ResourceKind::SampledImage),
            ]
        );
    }

    struct CountingFactory {
        samplers: SlotMap<SamplerId, SamplerSpec>,
        created: usize,
    }

    impl SamplerFactory for CountingFactory {
        type Error = std::convert::Infallible;

        fn create_sampler(&mut self, spec: &SamplerSpec) -> Result<SamplerId, Self::Error> {
            self.created += 1;
            Ok(self.samplers.insert(*spec))
        }
    }

    #[test]
    fn sampler_cache_deduplicates_by_spec_value() {
        let mut factory = CountingFactory { samplers: SlotMap::with_key(), created: 0 };
        let mut cache = SamplerCache::new();

        let spec = SamplerSpec::default();
        let first = cache.get_or_create(&mut factory, spec).unwrap();
        let second = cache.get_or_create(&mut factory, spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(factory.created, 1);

        let nearest = SamplerSpec { mag_filter: Filter::Nearest, ..spec };
        let third = cache.get_or_create(&mut factory, nearest).unwrap();
        assert_ne!(first, third);
        assert_eq!(factory.created, 2);
        assert_eq!(cache.len(), 2);
    }
}
