mod chunks;
mod ndjson;

pub use chunks::{Chunks, Error as ChunksError};
pub use ndjson::{Error as NdJsonError, NdJson};
