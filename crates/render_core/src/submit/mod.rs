//! Command stream recording and aggregation
//!
//! A [`CommandStream`] is a recorded list of backend-agnostic [`Command`]
//! values, validated as it is built: draws need a bound pipeline, indexed
//! draws need a bound index buffer, and resource packages must be prepared
//! before they are referenced. Worker threads record their own streams in
//! parallel and a single submitting thread merges them with
//! [`CommandStream::append`] before handing the sealed primary stream to
//! the device queue.

use crate::binding::{BindingWrite, ResourcePackage};
use crate::geometry::IndexKind;
use crate::resource::{BufferId, PipelineId};

/// One recorded rendering command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Make a pipeline current for subsequent draws
    BindPipeline {
        /// Pipeline to bind
        pipeline: PipelineId,
    },
    /// Bind a vertex buffer at a byte offset
    BindVertexBuffer {
        /// Source buffer
        buffer: BufferId,
        /// Byte offset of the first vertex
        offset_bytes: u64,
    },
    /// Bind an index buffer at a byte offset
    BindIndexBuffer {
        /// Source buffer
        buffer: BufferId,
        /// Byte offset of the first index
        offset_bytes: u64,
        /// Width of each index
        kind: IndexKind,
    },
    /// Bind a prepared resource package as a descriptor set
    BindPackage {
        /// Descriptor set index
        set: u32,
        /// Materialized writes from the prepared package
        writes: Vec<BindingWrite>,
    },
    /// Update a push-constant range
    PushConstants {
        /// Byte offset within the push-constant block
        offset: u32,
        /// Raw constant data
        bytes: Vec<u8>,
    },
    /// Non-indexed draw
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Number of instances
        instance_count: u32,
        /// First vertex index
        first_vertex: u32,
        /// First instance index
        first_instance: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Number of instances
        instance_count: u32,
        /// First index within the bound index buffer
        first_index: u32,
        /// Signed value added to each index before vertex lookup
        vertex_offset: i32,
        /// First instance index
        first_instance: u32,
    },
}

/// Recording and aggregation contract violations
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// A draw was recorded with no pipeline bound
    #[error("draw recorded without a bound pipeline")]
    NoPipelineBound,

    /// An indexed draw was recorded with no index buffer bound
    #[error("indexed draw recorded without a bound index buffer")]
    NoIndexBufferBound,

    /// A dirty package was offered for binding
    #[error("resource package has pending changes; call prepare() first")]
    PackageNotPrepared,

    /// A recording call was made on a sealed stream
    #[error("command stream is sealed")]
    StreamSealed,

    /// An unsealed stream was offered where a sealed one is required
    #[error("command stream has not been sealed")]
    StreamNotSealed,
}

/// Result type for stream recording
pub type SubmitResult<T> = Result<T, SubmitError>;

/// An ordered, validated command recording
///
/// Streams move through two phases: open (recording) and sealed. Only a
/// sealed stream may be appended to another stream or submitted. A stream
/// is `Send`; recording itself is single-threaded per stream.
#[derive(Debug, Default, Clone)]
pub struct CommandStream {
    commands: Vec<Command>,
    pipeline_bound: bool,
    index_buffer_bound: bool,
    sealed: bool,
}

impl CommandStream {
    /// Create an empty open stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded commands in submission order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether the stream has been sealed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Bind a pipeline for subsequent draws
    pub fn bind_pipeline(&mut self, pipeline: PipelineId) -> SubmitResult<()> {
        self.require_open()?;
        self.pipeline_bound = true;
        self.commands.push(Command::BindPipeline { pipeline });
        Ok(())
    }

    /// Bind a vertex buffer
    pub fn bind_vertex_buffer(&mut self, buffer: BufferId, offset_bytes: u64) -> SubmitResult<()> {
        self.require_open()?;
        self.commands.push(Command::BindVertexBuffer { buffer, offset_bytes });
        Ok(())
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(
        &mut self,
        buffer: BufferId,
        offset_bytes: u64,
        kind: IndexKind,
    ) -> SubmitResult<()> {
        self.require_open()?;
        self.index_buffer_bound = true;
        self.commands.push(Command::BindIndexBuffer { buffer, offset_bytes, kind });
        Ok(())
    }

    /// Bind a prepared resource package as descriptor set `set`
    ///
    /// The package must be clean; a dirty package is a contract violation
    /// because its materialized writes would not reflect its bindings.
    pub fn bind_package(&mut self, set: u32, package: &ResourcePackage) -> SubmitResult<()> {
        self.require_open()?;
        if !package.is_prepared() {
            return Err(SubmitError::PackageNotPrepared);
        }
        self.commands.push(Command::BindPackage { set, writes: package.writes().to_vec() });
        Ok(())
    }

    /// Update push constants at `offset`
    pub fn push_constants(&mut self, offset: u32, bytes: &[u8]) -> SubmitResult<()> {
        self.require_open()?;
        self.commands.push(Command::PushConstants { offset, bytes: bytes.to_vec() });
        Ok(())
    }

    /// Record a non-indexed draw
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> SubmitResult<()> {
        self.require_open()?;
        if !self.pipeline_bound {
            return Err(SubmitError::NoPipelineBound);
        }
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Record an indexed draw
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> SubmitResult<()> {
        self.require_open()?;
        if !self.pipeline_bound {
            return Err(SubmitError::NoPipelineBound);
        }
        if !self.index_buffer_bound {
            return Err(SubmitError::NoIndexBufferBound);
        }
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
        Ok(())
    }

    /// Merge a sealed worker stream into this open stream
    ///
    /// Commands keep their relative order and land after everything already
    /// recorded here. The appended stream's bind state does not leak into
    /// this stream's validation: a worker stream is self-contained.
    pub fn append(&mut self, secondary: CommandStream) -> SubmitResult<()> {
        self.require_open()?;
        if !secondary.sealed {
            return Err(SubmitError::StreamNotSealed);
        }
        self.commands.extend(secondary.commands);
        Ok(())
    }

    /// Seal the stream; no further recording is accepted
    pub fn finish(&mut self) -> SubmitResult<()> {
        self.require_open()?;
        self.sealed = true;
        log::trace!("Sealed command stream with {} commands", self.commands.len());
        Ok(())
    }

    fn require_open(&self) -> SubmitResult<()> {
        if self.sealed {
            return Err(SubmitError::StreamSealed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{BindingLayout, BlockMember, ReflectedResource, ResourceKind};
    use crate::resource::{BufferId, PipelineId};
    use slotmap::Key;
    use std::sync::Arc;

    fn pipeline() -> PipelineId {
        PipelineId::null()
    }

    fn buffer() -> BufferId {
        BufferId::null()
    }

    #[test]
    fn draw_requires_a_bound_pipeline() {
        let mut stream = CommandStream::new();
        assert_eq!(stream.draw(3, 1, 0, 0), Err(SubmitError::NoPipelineBound));

        stream.bind_pipeline(pipeline()).unwrap();
        stream.draw(3, 1, 0, 0).unwrap();
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn indexed_draw_requires_an_index_buffer() {
        let mut stream = CommandStream::new();
        stream.bind_pipeline(pipeline()).unwrap();
        assert_eq!(
            stream.draw_indexed(6, 1, 0, 0, 0),
            Err(SubmitError::NoIndexBufferBound)
        );

        stream.bind_index_buffer(buffer(), 0, IndexKind::U16).unwrap();
        stream.draw_indexed(6, 1, 0, 0, 0).unwrap();
    }

    #[test]
    fn sealed_streams_reject_further_recording() {
        let mut stream = CommandStream::new();
        stream.bind_pipeline(pipeline()).unwrap();
        stream.finish().unwrap();

        assert_eq!(stream.bind_vertex_buffer(buffer(), 0), Err(SubmitError::StreamSealed));
        assert_eq!(stream.finish(), Err(SubmitError::StreamSealed));
        assert!(stream.is_sealed());
    }

    #[test]
    fn append_requires_a_sealed_secondary() {
        let mut primary = CommandStream::new();
        let mut worker = CommandStream::new();
        worker.bind_pipeline(pipeline()).unwrap();

        assert_eq!(
            primary.append(worker.clone()),
            Err(SubmitError::StreamNotSealed)
        );

        worker.finish().unwrap();
        primary.append(worker).unwrap();
        assert_eq!(primary.len(), 1);
    }

    #[test]
    fn append_preserves_command_order() {
        let mut primary = CommandStream::new();
        primary.bind_pipeline(pipeline()).unwrap();
        primary.draw(3, 1, 0, 0).unwrap();

        let mut worker = CommandStream::new();
        worker.bind_vertex_buffer(buffer(), 64).unwrap();
        worker.finish().unwrap();

        primary.append(worker).unwrap();
        assert!(matches!(
            primary.commands(),
            [
                Command::BindPipeline { .. },
                Command::Draw { .. },
                Command::BindVertexBuffer { offset_bytes: 64, .. },
            ]
        ));
    }

    #[test]
    fn worker_bind_state_does_not_leak_into_the_primary() {
        let mut worker = CommandStream::new();
        worker.bind_pipeline(pipeline()).unwrap();
        worker.finish().unwrap();

        let mut primary = CommandStream::new();
        primary.append(worker).unwrap();
        // The primary still has no pipeline of its own.
        assert_eq!(primary.draw(3, 1, 0, 0), Err(SubmitError::NoPipelineBound));
    }

    #[test]
    fn dirty_packages_cannot_be_bound() {
        let layout = Arc::new(BindingLayout::from_resources(&[ReflectedResource {
            set: 0,
            binding: 0,
            kind: ResourceKind::UniformBuffer,
            count: 1,
            offset: 0,
            members: vec![BlockMember::scalar(4)],
        }]));
        let mut package = ResourcePackage::new(layout);
        package
            .bind(0, 0, crate::binding::BoundResource::Buffer { buffer: buffer(), offset: 0 })
            .unwrap();

        let mut stream = CommandStream::new();
        assert_eq!(stream.bind_package(0, &package), Err(SubmitError::PackageNotPrepared));

        package.prepare().unwrap();
        stream.bind_package(0, &package).unwrap();
        assert!(matches!(
            stream.commands(),
            [Command::BindPackage { set: 0, writes }] if writes.len() == 1
        ));
    }

    #[test]
    fn streams_can_cross_thread_boundaries() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandStream>();
    }

    #[test]
    fn push_constants_record_raw_bytes() {
        let mut stream = CommandStream::new();
        stream.push_constants(16, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            stream.commands(),
            &[Command::PushConstants { offset: 16, bytes: vec![1, 2, 3, 4] }]
        );
    }
}
