//! Barcode (UMI) extraction from read names or leading read bases.

use regex::Regex;
use regex::bytes::Regex as BytesRegex;
use smartstring::{SmartString, LazyCompact};
use std::str;

use crate::errors::{Result, UmiError};

pub type Umi = SmartString<LazyCompact>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarcodeLocation {
	ReadName,
	Sequence(usize)   // 1-based offset of the first barcode base
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BarcodeMatch {
	Found(BarcodeLocation, Umi),
	NotFound
}

struct InlinePattern {
	regex: BytesRegex,
	window: usize
}

pub struct BarcodeExtractor {
	marker: String,
	tagged: Regex,
	inline: Option<InlinePattern>
}

impl BarcodeExtractor {
	pub fn new(marker: &str, umi_len: usize) -> Result<BarcodeExtractor> {
		if marker.is_empty() || umi_len == 0 {
			return Err(UmiError::InvalidPattern(format!("{}{{{}}}", marker, umi_len)));
		}
		// The nucleotide run after the marker must be exactly umi_len long.
		let tagged = Regex::new(&format!("{}([ACGTN]{{{}}})(?:[^ACGTN]|$)",
			regex::escape(marker), umi_len))
			.map_err(|_| UmiError::InvalidPattern(marker.into()))?;
		Ok(BarcodeExtractor { marker: marker.into(), tagged, inline: None })
	}

	// In an inline pattern, each N is a barcode base and every other
	// letter is a literal anchor, e.g. NNNNNNNNNNTGA.
	pub fn with_inline_pattern(mut self, pattern: &str, window: usize) -> Result<BarcodeExtractor> {
		let pattern = pattern.to_ascii_uppercase();
		if pattern.is_empty() || !pattern.contains('N') ||
			pattern.bytes().any(|b| !b"ACGTN".contains(&b)) {
			return Err(UmiError::InvalidPattern(pattern));
		}

		let mut expr = String::new();
		let bytes = pattern.as_bytes();
		let mut k = 0;
		while k < bytes.len() {
			let run = bytes[k..].iter().take_while(|&&b| b == bytes[k]).count();
			if bytes[k] == b'N' {
				expr += &format!("([ACGTN]{{{}}})", run);
			} else {
				expr += &pattern[k..k + run];
			}
			k += run;
		}

		let regex = BytesRegex::new(&expr)
			.map_err(|_| UmiError::InvalidPattern(pattern.clone()))?;
		self.inline = Some(InlinePattern { regex, window });
		Ok(self)
	}

	pub fn extract(&self, read_name: &str, seq: &[u8]) -> BarcodeMatch {
		if read_name.contains(self.marker.as_str()) {
			return match self.tagged.captures(read_name) {
				Some(caps) => BarcodeMatch::Found(BarcodeLocation::ReadName, caps[1].into()),
				None => BarcodeMatch::NotFound
			};
		}

		let inline = match &self.inline {
			Some(inline) => inline,
			None => return BarcodeMatch::NotFound
		};
		let region = &seq[..seq.len().min(inline.window)];
		let caps = match inline.regex.captures(region) {
			Some(caps) => caps,
			None => return BarcodeMatch::NotFound
		};

		let mut umi = Umi::new();
		for group in caps.iter().skip(1).flatten() {
			// The capture groups only match ASCII nucleotides.
			umi.push_str(str::from_utf8(group.as_bytes()).unwrap_or(""));
		}
		let start = caps.get(0).map_or(0, |m| m.start());
		BarcodeMatch::Found(BarcodeLocation::Sequence(start + 1), umi)
	}
}
