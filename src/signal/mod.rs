/// Per-sequence signal processing.
///
/// ```text
///   channel samples
///        │
///        ├──► segment   threshold → Vec<Bead>
///        │
///        └──► per bead slice
///               ├──► smoother   boundary-aware recurrence mean
///               └──► filter     FilterConfig → PreparedFilter → apply
///                                  (IIR kinds designed in iir)
/// ```

pub mod filter;
mod iir;
pub mod segment;
pub mod smoother;

pub use filter::{filter, FilterConfig, FilterError, PreparedFilter};
pub use segment::segment;
pub use smoother::{smooth, SmoothError};
