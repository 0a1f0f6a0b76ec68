//! Heap errors and the caller location they record.

use core::{fmt, panic};

use snafu::{GenerateImplicitData, Snafu};

use crate::provider::ExtendError;

/// Source location captured when a [`HeapError`] is raised.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static panic::Location<'static>);

impl Location {
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors returned by [`TagHeap`](crate::TagHeap) operations.
///
/// All of them come down to the heap provider refusing to grow, or to a
/// request too large to describe as a block size.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum HeapError {
    #[snafu(display("failed to set up the initial heap: {source}"))]
    Init {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: ExtendError,
    },
    #[snafu(display("failed to grow the heap by {increment} bytes: {source}"))]
    Grow {
        increment: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: ExtendError,
    },
    #[snafu(display("requested size overflows the block size: requested={requested}"))]
    SizeOverflow {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl HeapError {
    /// Returns the location where this error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::Init { location, .. }
            | Self::Grow { location, .. }
            | Self::SizeOverflow { location, .. } => *location,
        }
    }
}
