//! [`ActuationSink`] – where arbitrated commands leave the kernel.
//!
//! The arbiter only ever talks to this trait, so the physical link (serial
//! gateway, simulator, test recorder) can be swapped without touching the
//! arbitration logic.  Any wire-format flattening belongs to the sink.

use std::sync::Arc;

use rover_types::RoverCommand;

/// Receiver of every distinct command the arbiter resolves.
///
/// `emit` is called while the arbiter still holds its state lock, which is
/// what guarantees one emission per distinct winner.  Implementations must
/// therefore return quickly: queue the write, never perform blocking I/O
/// inline.
pub trait ActuationSink: Send + Sync {
    /// Accept the newly active command.
    fn emit(&self, command: &RoverCommand);
}

impl<T: ActuationSink + ?Sized> ActuationSink for Arc<T> {
    fn emit(&self, command: &RoverCommand) {
        (**self).emit(command)
    }
}

impl<T: ActuationSink + ?Sized> ActuationSink for Box<T> {
    fn emit(&self, command: &RoverCommand) {
        (**self).emit(command)
    }
}

/// Adapts a closure into an [`ActuationSink`].
///
/// ```
/// use rover_kernel::sink::{ActuationSink, FnSink};
/// use rover_types::{CommandPriority, RoverCommand};
///
/// let sink = FnSink(|cmd: &RoverCommand| println!("{},{}", cmd.x, cmd.y));
/// sink.emit(&RoverCommand::stop(CommandPriority::Safety, "doc", ""));
/// ```
pub struct FnSink<F>(pub F);

impl<F> ActuationSink for FnSink<F>
where
    F: Fn(&RoverCommand) + Send + Sync,
{
    fn emit(&self, command: &RoverCommand) {
        (self.0)(command)
    }
}
