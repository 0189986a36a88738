pub mod codec;
pub mod engine;
pub mod fastq;
pub mod index;
pub mod io;
pub mod model;
pub mod reads;
pub mod resolver;
pub mod store;
