//! The error types returned by every public operation in this crate.

/// Failures from the raw `/dev/mem` memory-mapped register window.
#[derive(thiserror::Error, Debug)]
pub enum MmioError {
    /// `/dev/mem` could not be opened, or a window could not be mapped.
    #[error("failed to map register window at {base:#x} (len {len:#x})")]
    Map {
        base: u32,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    /// An offset fell outside the mapped window.
    #[error("offset {offset:#x} is outside the mapped window (len {len:#x})")]
    OutOfWindow { offset: u32, len: usize },
}

/// Failures writing an ELF32 core dump.
#[derive(thiserror::Error, Debug)]
pub enum CoreDumpError {
    #[error("failed to create core dump file {path}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write core dump")]
    Write(#[source] std::io::Error),

    #[error("a memory region name or note name exceeded the encodable length")]
    NameTooLong,
}

/// The single error type returned by every engine operation.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A register-level access failed.
    #[error("register access failed")]
    Mmio(#[from] MmioError),

    /// A poll loop (halt-wait, single-step-wait) exceeded its deadline.
    #[error("timed out waiting for {op} after {elapsed_ms}ms")]
    Timeout { op: &'static str, elapsed_ms: u64 },

    /// `va_to_pa` reported a translation fault for the given virtual address.
    #[error("MMU translation fault for va {va:#010x} (PAR {par:#010x})")]
    MmuFault { va: u32, par: u32 },

    /// The shuttle observed a sticky data abort after a DCC transfer.
    #[error("sticky data abort, DBGDSCR = {dscr:#010x}")]
    StickyAbort { dscr: u32 },

    /// No hardware breakpoint comparator is free.
    #[error("no free hardware breakpoint slot")]
    NoFreeBreakpointSlot,

    /// No hardware watchpoint comparator is free.
    #[error("no free hardware watchpoint slot")]
    NoFreeWatchpointSlot,

    /// A breakpoint or watchpoint was requested with a size this core's
    /// comparators cannot encode (breakpoints: 2 or 4; watchpoints: 1, 2,
    /// or 4).
    #[error("unsupported breakpoint/watchpoint size {0}")]
    UnsupportedBreakwatchSize(u8),

    /// The operation requires the core to be halted, but it is running.
    #[error("core must be halted for this operation")]
    NotHalted,

    /// An out-of-range register index was requested.
    #[error("register index {0} is not valid")]
    InvalidRegister(u8),

    /// Writing the core dump failed.
    #[error("core dump failed")]
    CoreDump(#[from] CoreDumpError),

    /// Any other, unexpected failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
