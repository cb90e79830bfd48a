//! Function-level transformation passes.

pub mod mem2reg;
pub mod out_of_ssa;

pub use mem2reg::Mem2Reg;
pub use out_of_ssa::OutOfSsa;

use crate::Result;
use crate::cfg::Function;

/// A transformation applied to one function at a time.
pub trait FunctionPass {
  /// Run the pass over `func`, rewriting it in place.
  fn run(&mut self, func: &mut Function) -> Result<()>;
}
