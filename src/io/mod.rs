//! Random-access byte sources that archives are read from.

mod byte_source;

pub use byte_source::{ByteSource, FileSource, MemorySource};
