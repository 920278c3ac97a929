//! Capability probe.
//!
//! The probe only reports booleans; how they are detected is not the
//! runner's concern. Detection runs once per process and is cached, so every
//! query is pure and independent of any [`Gpu`](crate::gpu::Gpu) instance.

/// What the host can offer the device backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// A display surface exists.
    pub surface: bool,
    /// The surface (or headless context) can run shader programs.
    pub shader: bool,
    /// One dispatch can write several device targets.
    pub multiple_targets: bool,
}

lazy_static::lazy_static! {
    static ref DETECTED: Capabilities = Capabilities::probe_host();
}

impl Capabilities {
    /// Builds a capability set by hand.
    pub const fn new(surface: bool, shader: bool, multiple_targets: bool) -> Self {
        Self {
            surface,
            shader,
            multiple_targets,
        }
    }

    /// A headless host: no surface, full shader and multi-target support.
    pub const fn headless() -> Self {
        Self::new(false, true, true)
    }

    /// The cached result of probing this process's host.
    pub fn detect() -> Self {
        *DETECTED
    }

    /// Same capabilities with multi-target writes switched off.
    #[must_use]
    pub const fn without_multiple_targets(mut self) -> Self {
        self.multiple_targets = false;
        self
    }

    // no surface is ever acquired here; a missing adapter is covered by the
    // software device, so the host always reports headless support
    fn probe_host() -> Self {
        let caps = Self::headless();
        log::debug!("host capabilities: {caps:?}");
        caps
    }
}
