//! Memory source, backing file and mapping layers for queue regions

pub mod file;
pub mod mapping;
pub mod source;

pub use file::QueueFile;
pub use mapping::Mapping;
pub use source::{
    AnonymousMemorySource, DefaultMemorySource, HugePagesOption, MemorySource, OpenFlags,
};
