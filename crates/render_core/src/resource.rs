//! Arena-indexed resource handles
//!
//! GPU resources are referenced through small generational keys into
//! owner-held tables rather than raw pointers. The table that created a
//! handle is the only place the underlying native object lives; everything
//! else passes the key around by value.

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a device buffer owned by an allocator table
    pub struct BufferId;

    /// Handle to an image (view) owned by a backend resource table
    pub struct ImageId;

    /// Handle to a sampler owned by a sampler factory table
    pub struct SamplerId;

    /// Handle to a compiled pipeline owned by a backend pipeline table
    pub struct PipelineId;
}
