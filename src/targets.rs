//! Amplicon aliases and the invalid barcode mask.

use std::collections::HashSet;
use log::warn;

use crate::barcode::Umi;
use crate::common::FileReader;
use crate::site::Site;

pub const MASK_MARKER: &str = "INVALID";

struct Amplicon {
	chrom: String,
	start: u64,   // 0-based, inclusive
	end: u64,     // 0-based, exclusive
	name: String
}

#[derive(Default)]
pub struct AmpliconTable {
	amplicons: Vec<Amplicon>
}

impl AmpliconTable {
	// BED-style lines: chrom, start, end, name. Unparseable lines are
	// reported and skipped.
	pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> AmpliconTable {
		let mut amplicons = Vec::new();
		for line in lines {
			let cols: Vec<&str> = line.trim_end().split('\t').collect();
			if cols.len() < 4 || line.starts_with('#') || line.starts_with("track") { continue; }
			match (cols[1].parse(), cols[2].parse()) {
				(Ok(start), Ok(end)) => amplicons.push(Amplicon {
					chrom: cols[0].into(), start, end, name: cols[3].into()
				}),
				_ => warn!("Ignoring malformed target line: {}", line.trim_end())
			}
		}
		AmpliconTable { amplicons }
	}

	pub fn load(path: &str) -> AmpliconTable {
		let lines = read_lines(path);
		AmpliconTable::from_lines(lines.iter().map(|l| l.as_str()))
	}

	pub fn alias(&self, site: &Site) -> Option<&str> {
		self.amplicons.iter()
			.find(|a| a.chrom == site.chrom && a.start <= site.start && site.start < a.end)
			.map(|a| a.name.as_str())
	}
}

#[derive(Default)]
pub struct BarcodeMask {
	invalid: HashSet<(String, Umi)>
}

impl BarcodeMask {
	// Only lines carrying the INVALID marker field are masks; the first two
	// columns name the amplicon and barcode.
	pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> BarcodeMask {
		let mut invalid = HashSet::new();
		for line in lines {
			let cols: Vec<&str> = line.trim_end().split('\t').collect();
			if !cols.iter().any(|c| *c == MASK_MARKER) { continue; }
			if cols.len() < 3 {
				warn!("Ignoring malformed mask line: {}", line.trim_end());
				continue;
			}
			invalid.insert((cols[0].to_string(), Umi::from(cols[1])));
		}
		BarcodeMask { invalid }
	}

	pub fn load(path: &str) -> BarcodeMask {
		let lines = read_lines(path);
		BarcodeMask::from_lines(lines.iter().map(|l| l.as_str()))
	}

	pub fn len(&self) -> usize { self.invalid.len() }

	pub fn is_masked(&self, amplicon: &str, umi: &Umi) -> bool {
		!self.invalid.is_empty() && self.invalid.contains(&(amplicon.to_string(), umi.clone()))
	}
}

fn read_lines(path: &str) -> Vec<String> {
	let mut reader = FileReader::new(path);
	let mut line = String::new();
	let mut lines = Vec::new();
	while reader.read_line(&mut line) { lines.push(line.clone()); }
	lines
}
