//! Frame synchronization and render target lifecycle
//!
//! A [`RenderTarget`] paces N overlapping frames against one presentation
//! surface. Each frame index owns an "image available" semaphore, a
//! "render finished" semaphore and a frame-complete fence; all three are
//! created once and reused every N-th frame. The per-frame state machine
//! is `Idle -> Acquired -> Recording -> Submitted -> Idle`, with an
//! `Invalidated` side channel entered when the surface reports its images
//! are stale, resolved by [`RenderTarget::recreate`].
//!
//! A single thread drives each render target; recording for frame `i + 1`
//! cannot start before frame `i`'s fence has been observed signaled,
//! which [`RenderTarget::acquire_next_image`] enforces by blocking on the
//! fence with a finite timeout. A timed-out wait is device loss, not a
//! condition to retry.

/// Default number of frames in flight when the caller requests the
/// implementation minimum
pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 2;

/// Fence wait budget; exceeding it is treated as device loss
pub const FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Surface acquire wait budget
pub const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Result of asking the surface for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    /// The image is usable and optimal
    Ok,
    /// Usable, but the surface no longer matches its images; recreation
    /// is advisory
    Suboptimal,
    /// Unusable; the render target must be recreated before submitting
    OutOfDate,
}

/// Per-render-target frame state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Between frames; acquire may start
    Idle,
    /// An image has been acquired for the current frame index
    Acquired,
    /// Command recording is in progress
    Recording,
    /// The frame's commands have been handed to the device queue
    Submitted,
    /// The surface reported stale images; only recreate is legal
    Invalidated,
}

/// Requested number of frames kept in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramesInFlight {
    /// Implementation minimum ([`DEFAULT_FRAMES_IN_FLIGHT`])
    Default,
    /// An explicit count, clamped to what the surface supports
    Count(u32),
    /// The maximum the presentation surface supports
    Max,
}

/// Frame synchronizer failures
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    /// Fence timeout or any other unrecoverable device failure; the only
    /// valid response is full teardown and recreation of the device
    /// context
    #[error("device lost: {reason}")]
    DeviceLost {
        /// Description of the fatal condition
        reason: String,
    },

    /// The surface images are stale; recoverable through
    /// [`RenderTarget::recreate`]
    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    /// An operation was called outside its legal state (contract
    /// violation)
    #[error("invalid frame state: expected {expected:?}, found {found:?}")]
    InvalidState {
        /// The state the operation requires
        expected: FrameState,
        /// The state the render target was in
        found: FrameState,
    },

    /// Any other backend failure while creating sync objects, submitting
    /// or presenting; fatal for this render target
    #[error("frame backend error: {reason}")]
    Backend {
        /// Description of the underlying failure
        reason: String,
    },
}

/// Result type for frame operations
pub type FrameResult<T> = Result<T, FrameError>;

/// Device capability the synchronizer needs: sync object creation, fence
/// waits and queue submission
pub trait RenderDevice {
    /// CPU-GPU synchronization object
    type Fence;
    /// GPU-GPU synchronization object
    type Semaphore;
    /// A fully recorded, submittable command stream
    type CommandStream;

    /// Create a fence, optionally pre-signaled
    fn create_fence(&self, signaled: bool) -> FrameResult<Self::Fence>;

    /// Create a semaphore
    fn create_semaphore(&self) -> FrameResult<Self::Semaphore>;

    /// Block until the fence signals or the timeout elapses
    ///
    /// A timeout must surface as [`FrameError::DeviceLost`].
    fn wait_fence(&self, fence: &Self::Fence, timeout_ns: u64) -> FrameResult<()>;

    /// Return the fence to the unsignaled state
    fn reset_fence(&self, fence: &Self::Fence) -> FrameResult<()>;

    /// Submit a command stream to the device queue
    ///
    /// The queue waits on `wait` before any color-attachment output and
    /// signals `signal` plus `fence` on completion.
    fn submit(
        &self,
        stream: &Self::CommandStream,
        wait: &Self::Semaphore,
        signal: &Self::Semaphore,
        fence: &Self::Fence,
    ) -> FrameResult<()>;
}

/// Presentation surface collaborator owning the swap of on-screen images
pub trait PresentationSurface<D: RenderDevice> {
    /// Ask for the next available image, signaling `signal` when the
    /// image becomes usable
    fn acquire(&mut self, signal: &D::Semaphore, timeout_ns: u64)
        -> FrameResult<(u32, SurfaceStatus)>;

    /// Queue `image_index` for presentation after `wait` signals
    fn present(&mut self, image_index: u32, wait: &D::Semaphore) -> FrameResult<SurfaceStatus>;

    /// Current surface extent in pixels
    fn current_extent(&self) -> (u32, u32);

    /// Number of images the surface currently holds
    fn image_count(&self) -> u32;

    /// Maximum image count the surface supports, 0 when unbounded
    fn max_image_count(&self) -> u32;
}

/// Synchronization objects for one frame index, reused every N-th frame
pub struct FrameSync<D: RenderDevice> {
    /// Signaled when the swap image for this frame becomes usable
    pub image_available: D::Semaphore,
    /// Signaled when this frame's rendering completes
    pub render_finished: D::Semaphore,
    /// Signaled when this frame's submission fully retires
    pub frame_complete: D::Fence,
}

impl<D: RenderDevice> FrameSync<D> {
    /// Create the three sync objects; the fence starts signaled so the
    /// first wait on a never-submitted frame passes immediately
    pub fn new(device: &D) -> FrameResult<Self> {
        Ok(Self {
            image_available: device.create_semaphore()?,
            render_finished: device.create_semaphore()?,
            frame_complete: device.create_fence(true)?,
        })
    }
}

/// A successfully acquired swap image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Swap-image slot returned by the surface; not necessarily equal to
    /// the frame index
    pub image_index: u32,
    /// The surface reported suboptimal; recreation is advisable but not
    /// required
    pub should_recreate: bool,
}

/// Multi-frame-in-flight coordinator bound to one surface and one device
pub struct RenderTarget<D: RenderDevice> {
    frames: Vec<FrameSync<D>>,
    frame_index: usize,
    buffer_count: u32,
    state: FrameState,
    extent: (u32, u32),
}

impl<D: RenderDevice> RenderTarget<D> {
    /// Create a render target with the requested frames-in-flight count
    ///
    /// The count is resolved against the surface once and then fixed for
    /// the target's lifetime, surviving recreation.
    pub fn new<S: PresentationSurface<D>>(
        device: &D,
        surface: &S,
        requested: FramesInFlight,
    ) -> FrameResult<Self> {
        let buffer_count = resolve_buffer_count(requested, surface);
        log::debug!(
            "Creating render target: {} frames in flight ({} surface images)",
            buffer_count,
            surface.image_count()
        );

        let mut frames = Vec::with_capacity(buffer_count as usize);
        for _ in 0..buffer_count {
            frames.push(FrameSync::new(device)?);
        }

        Ok(Self {
            frames,
            frame_index: 0,
            buffer_count,
            state: FrameState::Idle,
            extent: surface.current_extent(),
        })
    }

    /// Fixed number of frames kept in flight
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// Current frame index in `[0, buffer_count)`
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Current state of the frame state machine
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Extent derived from the surface at creation or last recreate
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// Sync objects of the current frame index
    pub fn current_frame(&self) -> &FrameSync<D> {
        &self.frames[self.frame_index]
    }

    /// Wait for the current frame index to retire, then acquire an image
    ///
    /// Blocks on the frame-complete fence first: slot `i`'s resources are
    /// never re-recorded while `i`'s fence is unsignaled. An out-of-date
    /// surface moves the target to `Invalidated` and the caller must
    /// [`RenderTarget::recreate`] before submitting again.
    pub fn acquire_next_image<S: PresentationSurface<D>>(
        &mut self,
        device: &D,
        surface: &mut S,
    ) -> FrameResult<AcquiredImage> {
        self.expect_state(FrameState::Idle)?;

        let frame = &self.frames[self.frame_index];
        device.wait_fence(&frame.frame_complete, FENCE_TIMEOUT_NS)?;
        // The fence is reset just before submission, not here, so a
        // recreate between acquire and submit leaves it signaled.

        let (image_index, status) = surface.acquire(&frame.image_available, ACQUIRE_TIMEOUT_NS)?;
        match status {
            SurfaceStatus::OutOfDate => {
                log::warn!("Surface out of date during acquire");
                self.state = FrameState::Invalidated;
                Err(FrameError::SurfaceOutOfDate)
            }
            SurfaceStatus::Suboptimal => {
                self.state = FrameState::Acquired;
                Ok(AcquiredImage { image_index, should_recreate: true })
            }
            SurfaceStatus::Ok => {
                self.state = FrameState::Acquired;
                Ok(AcquiredImage { image_index, should_recreate: false })
            }
        }
    }

    /// Mark the start of command recording for the acquired frame
    pub fn begin_recording(&mut self) -> FrameResult<()> {
        self.expect_state(FrameState::Acquired)?;
        self.state = FrameState::Recording;
        Ok(())
    }

    /// Submit the recorded command stream for the current frame
    ///
    /// The submission waits on "image available" before color output,
    /// signals "render finished" and resets-then-signals the
    /// frame-complete fence. Submission failures are fatal for this
    /// render target.
    pub fn submit(&mut self, device: &D, stream: &D::CommandStream) -> FrameResult<()> {
        self.expect_state(FrameState::Recording)?;

        let frame = &self.frames[self.frame_index];
        device.reset_fence(&frame.frame_complete)?;
        device.submit(
            stream,
            &frame.image_available,
            &frame.render_finished,
            &frame.frame_complete,
        )?;
        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Request presentation of `image_index`, waiting on "render finished"
    ///
    /// Returns whether the caller should recreate (suboptimal surface).
    pub fn present<S: PresentationSurface<D>>(
        &mut self,
        surface: &mut S,
        image_index: u32,
    ) -> FrameResult<bool> {
        self.expect_state(FrameState::Submitted)?;

        let frame = &self.frames[self.frame_index];
        match surface.present(image_index, &frame.render_finished)? {
            SurfaceStatus::OutOfDate => {
                log::warn!("Surface out of date during present");
                self.state = FrameState::Invalidated;
                Err(FrameError::SurfaceOutOfDate)
            }
            SurfaceStatus::Suboptimal => Ok(true),
            SurfaceStatus::Ok => Ok(false),
        }
    }

    /// Advance to the next frame index
    ///
    /// Called exactly once per completed frame, never skipped, never
    /// twice: `frame_index = (frame_index + 1) % buffer_count`, returning
    /// the state machine to `Idle`.
    pub fn increment_frame_index(&mut self) -> FrameResult<()> {
        self.expect_state(FrameState::Submitted)?;
        self.frame_index = (self.frame_index + 1) % self.buffer_count as usize;
        self.state = FrameState::Idle;
        Ok(())
    }

    /// Rebuild surface-derived state after a resize or invalidation
    ///
    /// Preserves the buffer count and reuses the existing sync objects;
    /// only the extent is re-derived. Legal from `Invalidated` (mandatory
    /// recreate) and `Idle` (advisory resize); calling mid-frame is a
    /// contract violation.
    pub fn recreate<S: PresentationSurface<D>>(&mut self, surface: &S) -> FrameResult<()> {
        match self.state {
            FrameState::Idle | FrameState::Invalidated => {}
            found => {
                return Err(FrameError::InvalidState { expected: FrameState::Invalidated, found })
            }
        }

        self.extent = surface.current_extent();
        self.state = FrameState::Idle;
        log::info!("Render target recreated at {}x{}", self.extent.0, self.extent.1);
        Ok(())
    }

    fn expect_state(&self, expected: FrameState) -> FrameResult<()> {
        if self.state != expected {
            return Err(FrameError::InvalidState { expected, found: self.state });
        }
        Ok(())
    }
}

/// Resolve a frames-in-flight request against surface limits
///
/// The ceiling is the surface's maximum image count; a surface reporting
/// 0 (no stated maximum) falls back to its current image count.
fn resolve_buffer_count<D: RenderDevice, S: PresentationSurface<D>>(
    requested: FramesInFlight,
    surface: &S,
) -> u32 {
    let ceiling = match surface.max_image_count() {
        0 => surface.image_count().max(1),
        n => n,
    };
    match requested {
        FramesInFlight::Default => DEFAULT_FRAMES_IN_FLIGHT.clamp(1, ceiling),
        FramesInFlight::Count(n) => n.clamp(1, ceiling),
        FramesInFlight::Max => ceiling,
    }
}
