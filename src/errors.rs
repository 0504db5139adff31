//! Error types shared by the site-processing engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UmiError>;

#[derive(Error, Debug)]
pub enum UmiError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("BAM access failed: {0}")]
	Htslib(#[from] rust_htslib::errors::Error),

	/// The reference genome could not be opened or read.
	#[error("Cannot read reference genome '{path}': {reason}")]
	Reference { path: String, reason: String },

	#[error("Invalid site '{text}': {reason}")]
	InvalidSite { text: String, reason: String },

	#[error("Chromosome '{0}' is not present in the BAM header")]
	UnknownContig(String),

	/// A line in a tab-separated input table could not be parsed.
	#[error("{path}, line {line}: {reason}")]
	InvalidLine { path: String, line: usize, reason: String },

	#[error("Unsupported barcode pattern '{0}'")]
	InvalidPattern(String),
}
