//! Batch size resolution.
//!
//! The client may ask for a batch size; the server decides the ceiling.

/// Requested and server-enforced batch sizes for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizeConfig {
    /// Size requested by the client, if any.
    pub requested: Option<usize>,
    /// Hard ceiling enforced by the server.
    pub server_max: usize,
}

impl BatchSizeConfig {
    /// Creates a batch size configuration.
    pub fn new(requested: Option<usize>, server_max: usize) -> Self {
        Self {
            requested,
            server_max,
        }
    }

    /// Returns the effective batch size.
    pub fn effective(&self) -> usize {
        BatchSizeGovernor::resolve(self.requested, self.server_max)
    }
}

/// Resolves the batch size a run uses.
///
/// The value is resolved once when a run starts and held for the whole run,
/// so a server ceiling that changes mid-run only affects the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizeGovernor {
    config: BatchSizeConfig,
    effective: usize,
}

impl BatchSizeGovernor {
    /// Resolves `requested` against `server_max`.
    ///
    /// The server ceiling can only shrink a request. Zero is treated as one
    /// so a run always makes progress.
    pub fn resolve(requested: Option<usize>, server_max: usize) -> usize {
        let effective = match requested {
            Some(requested) => requested.min(server_max),
            None => server_max,
        };
        effective.max(1)
    }

    /// Pins the effective size for a run.
    pub fn for_run(requested: Option<usize>, server_max: usize) -> Self {
        let config = BatchSizeConfig::new(requested, server_max);
        Self {
            config,
            effective: config.effective(),
        }
    }

    /// Returns the size pinned for this run.
    pub fn effective(&self) -> usize {
        self.effective
    }

    /// Returns the inputs the size was resolved from.
    pub fn config(&self) -> BatchSizeConfig {
        self.config
    }

    /// Returns true if the server ceiling reduced the requested size.
    pub fn was_capped(&self) -> bool {
        self.config
            .requested
            .is_some_and(|requested| requested > self.config.server_max)
    }
}
