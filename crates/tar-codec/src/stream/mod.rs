//! Streaming tar decoding and encoding with transparent GNU and PAX
//! extension handling.
//!
//! # Overview
//!
//! Tar archives can carry extended metadata in separate records that precede
//! the entry they describe:
//!
//! - **GNU long name (type 'L')**: paths longer than 100 bytes
//! - **GNU long link (type 'K')**: link targets longer than 100 bytes
//! - **PAX extended headers (type 'x')**: key/value pairs for path, size,
//!   uid, gid, mtime, xattrs and so on
//! - **PAX global headers (type 'g')**: defaults for all subsequent entries
//!
//! [`TarDecoder`] folds these records into the next real entry and yields
//! only real entries. [`TarEncoder`] writes them whenever a header needs
//! more than the ustar block can hold.
//!
//! Both sides work incrementally. The decoder pulls chunks from a
//! [`ByteSource`] through a [`LookaheadReader`], so bodies are never
//! buffered; the encoder copies each body straight into the sink.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use tar_codec::stream::TarDecoder;
//!
//! let file = File::open("archive.tar").unwrap();
//! let mut decoder = TarDecoder::from_reader(BufReader::new(file));
//!
//! while let Some(mut entry) = decoder.next_entry().unwrap() {
//!     println!("{} ({} bytes)", entry.header.name, entry.header.size);
//!     while let Some(chunk) = entry.body.next_chunk().unwrap() {
//!         // process chunk
//!         let _ = chunk;
//!     }
//! }
//! ```

mod decoder;
mod encoder;
mod error;
mod reader;

pub use decoder::{Body, Entry, TarDecoder};
pub use encoder::TarEncoder;
pub use error::{Result, StreamError};
pub use reader::{ByteSource, IterSource, LookaheadReader, ReadSource};

#[cfg(test)]
mod tests;
