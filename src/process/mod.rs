//! Media subprocess command construction and supervision

pub mod command;
pub mod supervisor;

pub use command::{InputSource, MediaCommand, OutputSink};
pub use supervisor::{
    ExitReason, MediaProcessHandle, MediaSupervisor, ProcessEvent, ProcessEventSender,
};
